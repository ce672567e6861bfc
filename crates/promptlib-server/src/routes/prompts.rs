//! Prompt library routes.

use axum::{http::StatusCode, Json};
use promptlib_core::estimate_tokens;
use promptlib_types::{assemble_prompt, ContextBlock};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct AssembleRequest {
    #[serde(default)]
    pub blocks: Vec<ContextBlock>,
    #[serde(default)]
    pub custom_text: String,
}

#[derive(Serialize)]
pub struct AssembleResponse {
    pub prompt: String,
    pub estimated_tokens: u32,
}

/// POST /api/prompts/assemble - Join context blocks and custom text into one prompt.
pub async fn assemble(
    Json(req): Json<AssembleRequest>,
) -> Result<Json<AssembleResponse>, (StatusCode, String)> {
    let prompt = assemble_prompt(&req.blocks, &req.custom_text);
    if prompt.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Prompt is empty".to_string()));
    }

    Ok(Json(AssembleResponse {
        estimated_tokens: estimate_tokens(&prompt),
        prompt,
    }))
}
