use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Canonical events emitted while a generation request runs
/// (provider-agnostic).
///
/// Every adapter translates its provider's wire format into this vocabulary;
/// clients only ever see these. On the wire each event is one data-only SSE
/// frame whose JSON carries the discriminating `type` field.
///
/// Exactly one of `error` or `done` terminates a request, and nothing may
/// follow it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// First event of every stream.
    Start {
        request_id: String,
        /// Adapter family that handles the request ("chat", "native", "task").
        route: String,
        model: String,
    },

    /// Incremental assistant text.
    Content { content: String },

    /// Incremental reasoning / thought text.
    Reasoning { content: String },

    /// Whether web search ran for this request.
    Search { used: bool },

    /// Sources backing the search context.
    SearchSources { sources: Vec<SearchSource> },

    /// Full final image list; emitted at most once per request.
    Images { images: Vec<String> },

    /// Generated video URL; emitted at most once per request.
    Video { url: String },

    /// Provider diagnostics: usage metadata, poll heartbeats.
    Debug {
        #[serde(flatten)]
        data: serde_json::Map<String, serde_json::Value>,
    },

    /// A tool call started streaming from the provider.
    ToolCallStart { name: String },

    /// A tool call was executed; `result` is the function output.
    ToolResult { name: String, result: String },

    /// Terminal failure.
    Error { error: String },

    /// Terminal success.
    Done,
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. } | StreamEvent::Done)
    }

    /// Build a `debug` event from key/value pairs.
    pub fn debug(pairs: &[(&str, serde_json::Value)]) -> Self {
        let mut data = serde_json::Map::new();
        for (k, v) in pairs {
            data.insert((*k).to_owned(), v.clone());
        }
        StreamEvent::Debug { data }
    }
}

/// A single search hit surfaced to the client and persisted as metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchSource {
    pub title: String,
    pub url: String,
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_type_tags() {
        let ev = StreamEvent::Start {
            request_id: "req-1".into(),
            route: "chat".into(),
            model: "m".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["requestId"], "req-1");

        let ev = StreamEvent::SearchSources { sources: vec![] };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "search_sources");

        let ev = StreamEvent::ToolCallStart { name: "t".into() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "tool_call_start");
    }

    #[test]
    fn debug_event_flattens_payload() {
        let ev = StreamEvent::debug(&[
            ("status", serde_json::json!("running")),
            ("polls", serde_json::json!(3)),
        ]);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "debug");
        assert_eq!(json["status"], "running");
        assert_eq!(json["polls"], 3);
    }

    #[test]
    fn only_error_and_done_are_terminal() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::Error { error: "x".into() }.is_terminal());
        assert!(!StreamEvent::Content { content: "x".into() }.is_terminal());
        assert!(!StreamEvent::Search { used: true }.is_terminal());
    }
}
