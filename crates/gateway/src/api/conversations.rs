//! Conversation endpoints.
//!
//! - `GET /v1/conversations`     — list the caller's conversations
//! - `GET /v1/conversations/:id` — full conversation with messages
//!
//! Everything is scoped to the authenticated owner; a foreign id is
//! indistinguishable from a missing one.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};

use crate::api::auth::OwnerId;
use crate::state::AppState;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
) -> impl IntoResponse {
    let summaries: Vec<serde_json::Value> = state
        .store
        .list(&owner_id)
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "title": c.title,
                "model": c.model,
                "messageCount": c.messages.len(),
                "createdAt": c.created_at,
                "updatedAt": c.updated_at,
            })
        })
        .collect();

    Json(serde_json::json!({ "conversations": summaries }))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&id, &owner_id) {
        Some(conversation) => Json(conversation).into_response(),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("conversation {id} not found") })),
        )
            .into_response(),
    }
}
