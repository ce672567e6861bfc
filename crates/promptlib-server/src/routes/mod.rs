//! HTTP route handlers.

pub mod conversations;
pub mod models;
pub mod prompts;
pub mod ws;

use axum::{http::StatusCode, Json};
use promptlib_core::PromptlibError;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Map an engine error to a status and message.
pub(crate) fn error_response(e: PromptlibError) -> (StatusCode, String) {
    let status = match &e {
        PromptlibError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        PromptlibError::ConversationBusy(_) | PromptlibError::SessionInFlight(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
