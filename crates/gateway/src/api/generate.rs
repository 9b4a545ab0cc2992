//! Generation endpoint — the primary interface for running turns.
//!
//! `POST /v1/generate` accepts one user input against a conversation and
//! responds either as an SSE stream of canonical events (default) or as a
//! single JSON body. Omitting `conversationId` starts a new conversation
//! titled from the input; the id is returned in the `X-Conversation-Id`
//! response header (and in the JSON body when not streaming).

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use tokio::sync::mpsc;

use mm_domain::settings::GenerationSettings;
use mm_domain::stream::StreamEvent;

use crate::api::auth::OwnerId;
use crate::runtime::{run_turn, TurnInput};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    /// Target conversation. Absent = create a new one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// User input text.
    pub input: String,
    /// Image attachments (http(s) or data URLs).
    #[serde(default)]
    pub images: Vec<String>,
    /// Model override; falls back to the configured default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub settings: GenerationSettings,
    /// SSE streaming (default) vs a single JSON response.
    #[serde(default = "d_true")]
    pub stream: bool,
    /// Retry the last assistant reply without re-appending the input.
    #[serde(default)]
    pub regenerate: bool,
    #[serde(default)]
    pub web_search: bool,
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/generate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn generate(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Json(body): Json<GenerateBody>,
) -> Response {
    // Pre-flight rejections happen before the stream opens so clients get
    // real HTTP statuses instead of an error event.
    if let Err(e) = body.settings.validate() {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }

    let (model, adapter) = match state.registry.resolve(body.model.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let conversation_id = match &body.conversation_id {
        Some(id) => match state.store.get(id, &owner_id) {
            Some(c) => c.id,
            None => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    &format!("conversation {id} not found"),
                );
            }
        },
        None if body.regenerate => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "regenerate requires a conversationId",
            );
        }
        None => state.store.create(&owner_id, &model, &body.input).id,
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    let input = TurnInput {
        request_id: request_id.clone(),
        conversation_id: conversation_id.clone(),
        owner_id,
        input: body.input,
        images: body.images,
        model: model.clone(),
        adapter,
        settings: body.settings,
        regenerate: body.regenerate,
        web_search: body.web_search,
    };
    let streaming = body.stream;

    let rx = run_turn(state, input);

    if streaming {
        sse_response(rx, &request_id, &model, &conversation_id)
    } else {
        json_response(rx, &request_id, &model, &conversation_id).await
    }
}

// ── SSE path ────────────────────────────────────────────────────────

/// Every event is a data-only SSE frame; the discriminator lives in the
/// JSON `type` field, never in an SSE `event:` line.
fn sse_response(
    mut rx: mpsc::Receiver<StreamEvent>,
    request_id: &str,
    model: &str,
    conversation_id: &str,
) -> Response {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok::<_, std::convert::Infallible>(Event::default().data(data));
            if event.is_terminal() {
                break;
            }
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(v) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", v);
    }
    if let Ok(v) = HeaderValue::from_str(model) {
        headers.insert("x-model", v);
    }
    if let Ok(v) = HeaderValue::from_str(conversation_id) {
        headers.insert("x-conversation-id", v);
    }

    response
}

// ── Non-streaming path ──────────────────────────────────────────────

/// Drain the turn's events into one JSON body.
async fn json_response(
    mut rx: mpsc::Receiver<StreamEvent>,
    request_id: &str,
    model: &str,
    conversation_id: &str,
) -> Response {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut images: Vec<String> = Vec::new();
    let mut video: Option<String> = None;
    let mut search_used: Option<bool> = None;
    let mut sources: Option<Vec<mm_domain::stream::SearchSource>> = None;

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Content { content: c } => content.push_str(&c),
            StreamEvent::Reasoning { content: c } => reasoning.push_str(&c),
            StreamEvent::Images { images: i } => images = i,
            StreamEvent::Video { url } => video = Some(url),
            StreamEvent::Search { used } => search_used = Some(used),
            StreamEvent::SearchSources { sources: s } => sources = Some(s),
            StreamEvent::Error { error } => {
                return error_response(StatusCode::BAD_GATEWAY, &error);
            }
            StreamEvent::Done => break,
            StreamEvent::Start { .. }
            | StreamEvent::Debug { .. }
            | StreamEvent::ToolCallStart { .. }
            | StreamEvent::ToolResult { .. } => {}
        }
    }

    Json(serde_json::json!({
        "requestId": request_id,
        "conversationId": conversation_id,
        "model": model,
        "content": content,
        "reasoning": (!reasoning.is_empty()).then_some(reasoning),
        "images": (!images.is_empty()).then_some(images),
        "videoUrl": video,
        "searchUsed": search_used,
        "sources": sources,
    }))
    .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
