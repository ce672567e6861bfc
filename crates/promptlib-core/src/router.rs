//! Model routing from user-facing ids to provider model ids.

use std::collections::HashMap;

/// Built-in aliases: user-facing id -> provider model id.
pub const BUILTIN_MODELS: [(&str, &str); 8] = [
    ("gemini-3-pro", "google/gemini-3-pro-preview"),
    ("gemini-flash", "google/gemini-2.5-flash"),
    ("claude-sonnet", "anthropic/claude-sonnet-4.5"),
    ("claude-opus", "anthropic/claude-opus-4.1"),
    ("claude-haiku", "anthropic/claude-haiku-4.5"),
    ("gpt-4o", "openai/gpt-4o"),
    ("gpt-4o-mini", "openai/gpt-4o-mini"),
    ("gpt-5", "openai/gpt-5"),
];

/// Maps user-facing model ids to provider model ids.
///
/// Unknown ids are passed through unchanged; the provider rejects models it does not serve.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    table: HashMap<String, String>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self {
            table: BUILTIN_MODELS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl ModelRouter {
    /// Built-in table extended with extra aliases. Extra entries override built-ins.
    pub fn with_aliases<I, K, V>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut router = Self::default();
        for (k, v) in aliases {
            router.table.insert(k.into(), v.into());
        }
        router
    }

    /// Resolve a user-facing id.
    pub fn resolve<'a>(&'a self, user_facing_id: &'a str) -> &'a str {
        self.table
            .get(user_facing_id)
            .map(String::as_str)
            .unwrap_or(user_facing_id)
    }

    /// All known aliases, sorted by user-facing id.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .table
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }
}

/// Provider family of a model id, stored as the conversation's `model_provider`.
pub fn provider_family(model_id: &str) -> &'static str {
    let id = model_id.to_ascii_lowercase();
    if id.contains("claude") || id.starts_with("anthropic/") {
        "anthropic"
    } else if id.contains("gemini") || id.starts_with("google/") {
        "google"
    } else if id.contains("gpt") || id.starts_with("openai/") || id.starts_with("o1") || id.starts_with("o3") {
        "openai"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_alias() {
        let router = ModelRouter::default();
        assert_eq!(router.resolve("gemini-3-pro"), "google/gemini-3-pro-preview");
        assert_eq!(router.resolve("claude-sonnet"), "anthropic/claude-sonnet-4.5");
        assert_eq!(router.resolve("gpt-4o"), "openai/gpt-4o");
    }

    #[test]
    fn test_unknown_id_passes_through() {
        let router = ModelRouter::default();
        assert_eq!(router.resolve("mistral/mistral-large"), "mistral/mistral-large");
        assert_eq!(router.resolve(""), "");
    }

    #[test]
    fn test_builtin_table_has_eight_entries() {
        assert_eq!(ModelRouter::default().entries().len(), 8);
    }

    #[test]
    fn test_aliases_override_builtins() {
        let router = ModelRouter::with_aliases([
            ("gpt-4o", "azure/gpt-4o"),
            ("local", "ollama/llama3"),
        ]);
        assert_eq!(router.resolve("gpt-4o"), "azure/gpt-4o");
        assert_eq!(router.resolve("local"), "ollama/llama3");
        assert_eq!(router.entries().len(), 9);
    }

    #[test]
    fn test_provider_family() {
        assert_eq!(provider_family("gpt-4o"), "openai");
        assert_eq!(provider_family("claude-sonnet"), "anthropic");
        assert_eq!(provider_family("gemini-3-pro"), "google");
        assert_eq!(provider_family("mistral-large"), "other");
    }
}
