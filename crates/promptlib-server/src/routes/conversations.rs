//! Conversation history routes.

use crate::routes::error_response;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use promptlib_types::{Conversation, ConversationMessage, ConversationPatch, ConversationStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Query parameters for listing conversations.
#[derive(Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
}

/// GET /api/conversations - Most recently updated first, deleted ones hidden.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<ConversationListResponse>, (StatusCode, String)> {
    let conversations = state
        .engine
        .store()
        .list_conversations(query.limit.min(200), query.offset)
        .map_err(error_response)?;

    Ok(Json(ConversationListResponse { conversations }))
}

/// GET /api/conversations/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    state
        .engine
        .store()
        .conversation(id)
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Conversation not found".to_string()))
}

/// User-editable fields. Token and cost totals are owned by the engine.
#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
    #[serde(default)]
    pub status: Option<ConversationStatus>,
}

/// PATCH /api/conversations/{id} - Rename, favorite, archive or delete.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateConversationRequest>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let title = match req.title {
        Some(title) if title.trim().is_empty() => {
            return Err((StatusCode::BAD_REQUEST, "Title cannot be empty".to_string()));
        }
        Some(title) => Some(title.trim().to_string()),
        None => None,
    };

    let patch = ConversationPatch {
        title,
        is_favorite: req.is_favorite,
        status: req.status,
        ..Default::default()
    };
    if patch.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Nothing to update".to_string()));
    }

    let conversation = state
        .engine
        .store()
        .patch_conversation(id, patch)
        .map_err(error_response)?;
    info!(target: "promptlib::api", "Updated conversation {}", id);

    Ok(Json(conversation))
}

#[derive(Serialize)]
pub struct MessageListResponse {
    pub conversation_id: Uuid,
    pub messages: Vec<ConversationMessage>,
}

/// GET /api/conversations/{id}/messages - Ordered by message_order.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageListResponse>, (StatusCode, String)> {
    let store = state.engine.store();
    if store.conversation(id).map_err(error_response)?.is_none() {
        return Err((StatusCode::NOT_FOUND, "Conversation not found".to_string()));
    }

    let messages = store.messages(id).map_err(error_response)?;
    Ok(Json(MessageListResponse {
        conversation_id: id,
        messages,
    }))
}
