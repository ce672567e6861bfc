//! Prompt library types.
//!
//! Context blocks are reusable snippets that are assembled with custom text into a prompt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reusable text snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContextBlock {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
        }
    }
}

/// Assemble selected blocks and custom text into a single prompt.
///
/// Blocks keep their given order and the custom text goes last. Parts that are empty or
/// whitespace-only are skipped; the rest are joined by a blank line.
pub fn assemble_prompt(blocks: &[ContextBlock], custom_text: &str) -> String {
    blocks
        .iter()
        .map(|b| b.content.trim())
        .chain(std::iter::once(custom_text.trim()))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
