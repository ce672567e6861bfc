//! Model table route.

use crate::state::AppState;
use axum::{extract::State, Json};
use promptlib_core::provider_family;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct ModelEntry {
    /// Id the client sends with a prompt.
    pub id: String,
    pub provider_model: String,
    pub provider: &'static str,
}

#[derive(Serialize)]
pub struct ModelListResponse {
    pub default_model: String,
    pub models: Vec<ModelEntry>,
}

/// GET /api/models
pub async fn list(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    let models = state
        .engine
        .router()
        .entries()
        .into_iter()
        .map(|(id, provider_model)| ModelEntry {
            id: id.to_string(),
            provider_model: provider_model.to_string(),
            provider: provider_family(id),
        })
        .collect();

    Json(ModelListResponse {
        default_model: state.engine.default_model().to_string(),
        models,
    })
}
