pub mod auth;
pub mod conversations;
pub mod generate;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health probe) and **protected**
/// (gated behind the per-user bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/healthz", get(healthz));

    let protected = Router::new()
        // Generation (core runtime)
        .route("/v1/generate", post(generate::generate))
        // Conversations
        .route("/v1/conversations", get(conversations::list_conversations))
        .route("/v1/conversations/:id", get(conversations::get_conversation))
        // Models
        .route("/v1/models", get(list_models))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_user_token,
        ));

    public.merge(protected)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_models(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "models": state.registry.list_models(),
        "defaultModel": state.config.default_model,
    }))
}
