//! API authentication middleware.
//!
//! Each configured user has a bearer token, read from an env var **once at
//! startup** and kept only as its SHA-256 digest (see
//! `bootstrap::build_token_table`). Protected requests must carry
//! `Authorization: Bearer <token>`; the matching entry's owner id is
//! attached to the request as an [`OwnerId`] extension and scopes every
//! conversation lookup downstream.
//!
//! An empty token table means dev mode: requests authenticate as
//! `owner_id = "dev"` and a warning is logged at startup.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// The authenticated caller's owner id, attached as a request extension.
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

/// Axum middleware enforcing bearer-token auth on protected routes.
/// Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_user_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if state.tokens.is_empty() {
        req.extensions_mut().insert(OwnerId("dev".into()));
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash to a fixed-length digest, then compare in constant time against
    // every entry so the scan cost does not depend on which token matched.
    let provided_hash = Sha256::digest(provided.as_bytes());
    let mut matched: Option<String> = None;
    for entry in state.tokens.iter() {
        if bool::from(provided_hash.ct_eq(entry.token_hash.as_slice())) && matched.is_none() {
            matched = Some(entry.owner_id.clone());
        }
    }

    match matched {
        Some(owner_id) => {
            req.extensions_mut().insert(OwnerId(owner_id));
            next.run(req).await
        }
        None => (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response(),
    }
}
