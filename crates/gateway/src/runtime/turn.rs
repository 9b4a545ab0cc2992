//! Turn execution — the pipeline behind `POST /v1/generate`.
//!
//! Entry point: [`run_turn`] spawns the async pipeline and returns a
//! channel of canonical [`StreamEvent`]s. One turn is: optional web
//! search, context assembly, adapter streaming (with the transport
//! fallback on chat routes), accumulation, and exactly one assistant
//! append on success.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use mm_conversations::build_context;
use mm_domain::error::{Error, Result};
use mm_domain::message::{Message, MessageMetadata};
use mm_domain::settings::GenerationSettings;
use mm_domain::stream::{SearchSource, StreamEvent};
use mm_providers::fallback::with_fallback;
use mm_providers::traits::{GenerateRequest, ProviderAdapter};

use crate::state::AppState;

use super::emitter::EventSink;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the pipeline needs for one turn. The handler resolves the
/// model and adapter up front so it can reject unknown models with a
/// proper HTTP status before the stream opens.
pub struct TurnInput {
    pub request_id: String,
    pub conversation_id: String,
    pub owner_id: String,
    pub input: String,
    pub images: Vec<String>,
    pub model: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub settings: GenerationSettings,
    /// Retry the last exchange: no new user message is appended and the
    /// stored history (superseded reply included) is passed to the
    /// provider in full.
    pub regenerate: bool,
    pub web_search: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn. The returned receiver yields events until a terminal
/// `done`/`error`; dropping it cancels the turn (partial output is
/// discarded, nothing is persisted).
pub fn run_turn(state: AppState, input: TurnInput) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel::<StreamEvent>(64);

    let span = tracing::info_span!(
        "turn",
        request_id = %input.request_id,
        conversation_id = %input.conversation_id,
        model = %input.model,
        "otel.kind" = "SERVER",
    );
    tokio::spawn(
        async move {
            let mut sink = EventSink::new(tx);
            if let Err(e) = run_turn_inner(&state, input, &mut sink).await {
                tracing::warn!(error = %e, "turn failed");
                sink.send(StreamEvent::Error { error: e.to_string() }).await;
            }
            if sink.is_cancelled() {
                tracing::debug!("client disconnected before the turn finished");
            }
        }
        .instrument(span),
    );

    rx
}

async fn run_turn_inner(
    state: &AppState,
    input: TurnInput,
    sink: &mut EventSink,
) -> Result<()> {
    // ── History & user-message persistence ─────────────────────────
    // On regenerate the user message is already persisted and the full
    // history (superseded reply included) goes to the provider; the
    // input is re-added as the current turn by the context builder.
    let history = state
        .store
        .find_messages(&input.conversation_id, &input.owner_id)
        .ok_or_else(|| Error::NotFound(format!("conversation {}", input.conversation_id)))?;

    if !input.regenerate {
        let user_msg = Message::user(&input.input).with_images(input.images.clone());
        state
            .store
            .append_message(&input.conversation_id, &input.owner_id, user_msg);
    }

    if !sink
        .send(StreamEvent::Start {
            request_id: input.request_id.clone(),
            route: input.adapter.route().into(),
            model: input.model.clone(),
        })
        .await
    {
        return Ok(());
    }

    // ── Web search (best-effort) ───────────────────────────────────
    let mut search_used = false;
    let mut sources: Option<Vec<SearchSource>> = None;
    let mut search_context: Option<String> = None;

    if input.web_search {
        if state.search.is_enabled() {
            match state.search.run(&input.input).await {
                Ok(outcome) => {
                    search_used = true;
                    if !sink.send(StreamEvent::Search { used: true }).await {
                        return Ok(());
                    }
                    if !outcome.sources.is_empty() {
                        sources = Some(outcome.sources.clone());
                        if !sink
                            .send(StreamEvent::SearchSources { sources: outcome.sources })
                            .await
                        {
                            return Ok(());
                        }
                    }
                    search_context = Some(outcome.context);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "search failed, continuing without it");
                    sink.send(StreamEvent::Search { used: false }).await;
                }
            }
        } else {
            sink.send(StreamEvent::Search { used: false }).await;
        }
    }

    // ── Context & request ──────────────────────────────────────────
    let turns = build_context(
        &state.config.history,
        &history,
        &input.input,
        &input.images,
        search_context.as_deref(),
    );
    let req = GenerateRequest {
        model: input.model.clone(),
        turns,
        settings: input.settings.clone(),
    };

    // ── Stream, with transport fallback on chat routes ─────────────
    let inner = input.adapter.generate_stream(&req).await?;
    // Re-running a submitted video task from scratch is not a recovery,
    // so task routes stream unwrapped.
    let mut stream = if input.adapter.route() == "task" {
        inner
    } else {
        with_fallback(Arc::clone(&input.adapter), req, inner)
    };

    // ── Accumulate & forward ───────────────────────────────────────
    let mut acc = TurnAccumulator::default();
    while let Some(item) = stream.next().await {
        let event = item?;
        acc.observe(&event);
        let failed = matches!(event, StreamEvent::Error { .. });
        let done = matches!(event, StreamEvent::Done);
        if !sink.send(event).await {
            // Client cancelled: stop the provider stream, persist nothing.
            return Ok(());
        }
        if failed {
            // Terminal failure from the adapter: discard partial content.
            return Ok(());
        }
        if done {
            break;
        }
    }

    if !sink.terminal_sent() {
        // Adapters end with Done or Err; a silent end is a provider bug.
        return Err(Error::Protocol {
            provider: input.adapter.id().into(),
            message: "stream ended without a terminal event".into(),
        });
    }

    // ── Persist exactly one assistant message ──────────────────────
    let metadata = MessageMetadata {
        reasoning: acc.reasoning(),
        search_used: search_used.then_some(true),
        sources,
        tokens_used: acc.total_tokens,
    };
    let mut assistant = Message::assistant(acc.content)
        .with_images(acc.images)
        .with_videos(acc.video.into_iter().collect());
    assistant.model = Some(input.model);
    if !metadata.is_empty() {
        assistant.metadata = Some(metadata);
    }
    state
        .store
        .append_message(&input.conversation_id, &input.owner_id, assistant);
    state.store.flush_async().await;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collects the stream into the persisted assistant message.
#[derive(Default)]
struct TurnAccumulator {
    content: String,
    reasoning_buf: String,
    images: Vec<String>,
    video: Option<String>,
    total_tokens: Option<u32>,
}

impl TurnAccumulator {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Content { content } => self.content.push_str(content),
            StreamEvent::Reasoning { content } => self.reasoning_buf.push_str(content),
            StreamEvent::Images { images } => self.images = images.clone(),
            StreamEvent::Video { url } => self.video = Some(url.clone()),
            StreamEvent::Debug { data } => {
                if let Some(total) = data.get("totalTokens").and_then(Value::as_u64) {
                    self.total_tokens = Some(total as u32);
                }
            }
            _ => {}
        }
    }

    fn reasoning(&self) -> Option<String> {
        if self.reasoning_buf.is_empty() {
            None
        } else {
            Some(self.reasoning_buf.clone())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mm_conversations::ConversationStore;
    use mm_domain::config::Config;
    use mm_domain::error::Result;
    use mm_domain::message::{Role, Turn};
    use mm_domain::stream::BoxStream;
    use mm_providers::registry::ProviderRegistry;
    use mm_providers::traits::Completion;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::search::SearchClient;

    #[test]
    fn accumulator_collects_all_artifact_kinds() {
        let mut acc = TurnAccumulator::default();
        acc.observe(&StreamEvent::Content { content: "Hello ".into() });
        acc.observe(&StreamEvent::Content { content: "world".into() });
        acc.observe(&StreamEvent::Reasoning { content: "because".into() });
        acc.observe(&StreamEvent::Images { images: vec!["https://x/i.png".into()] });
        acc.observe(&StreamEvent::Video { url: "https://x/v.mp4".into() });
        acc.observe(&StreamEvent::debug(&[("totalTokens", json!(42))]));

        assert_eq!(acc.content, "Hello world");
        assert_eq!(acc.reasoning().as_deref(), Some("because"));
        assert_eq!(acc.images.len(), 1);
        assert_eq!(acc.video.as_deref(), Some("https://x/v.mp4"));
        assert_eq!(acc.total_tokens, Some(42));
    }

    #[test]
    fn accumulator_ignores_non_artifact_events() {
        let mut acc = TurnAccumulator::default();
        acc.observe(&StreamEvent::Search { used: true });
        acc.observe(&StreamEvent::ToolCallStart { name: "calculate".into() });
        acc.observe(&StreamEvent::debug(&[("status", json!("running"))]));

        assert!(acc.content.is_empty());
        assert!(acc.total_tokens.is_none());
    }

    // ── Pipeline harness ────────────────────────────────────────────

    /// Canned-event adapter that records the context it was asked to
    /// generate from.
    struct StubAdapter {
        events: Vec<StreamEvent>,
        seen_turns: Arc<Mutex<Vec<Turn>>>,
    }

    impl StubAdapter {
        fn new(events: Vec<StreamEvent>) -> (Arc<Self>, Arc<Mutex<Vec<Turn>>>) {
            let seen_turns = Arc::new(Mutex::new(Vec::new()));
            let adapter = Arc::new(Self { events, seen_turns: seen_turns.clone() });
            (adapter, seen_turns)
        }
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for StubAdapter {
        fn id(&self) -> &str {
            "stub"
        }

        fn route(&self) -> &'static str {
            "chat"
        }

        async fn generate(&self, _req: &GenerateRequest) -> Result<Completion> {
            Ok(Completion::default())
        }

        async fn generate_stream(
            &self,
            req: &GenerateRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            *self.seen_turns.lock().unwrap() = req.turns.clone();
            let events = self.events.clone();
            Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
        }
    }

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let config = Arc::new(Config::default());
        let store = Arc::new(ConversationStore::new(dir.path()).unwrap());
        let registry = Arc::new(ProviderRegistry::from_config(&config));
        let search = Arc::new(SearchClient::from_config(&config.search));
        AppState {
            config,
            store,
            registry,
            search,
            tokens: Arc::new(Vec::new()),
        }
    }

    fn turn_input(
        conversation_id: &str,
        input: &str,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> TurnInput {
        TurnInput {
            request_id: "req-1".into(),
            conversation_id: conversation_id.into(),
            owner_id: "dev".into(),
            input: input.into(),
            images: Vec::new(),
            model: "stub-model".into(),
            adapter,
            settings: GenerationSettings::default(),
            regenerate: false,
            web_search: false,
        }
    }

    /// Drain the receiver until the pipeline task finishes (channel close
    /// implies persistence has completed too).
    async fn collect_events(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn start_is_the_first_event_even_with_search_requested() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let conv = state.store.create("dev", "stub-model", "hi");

        let (adapter, _) = StubAdapter::new(vec![
            StreamEvent::Content { content: "ok".into() },
            StreamEvent::Done,
        ]);
        let mut input = turn_input(&conv.id, "hi", adapter);
        // Search is requested but unconfigured: the stream must still open
        // with `start`, then report `search { used: false }`.
        input.web_search = true;

        let events = collect_events(run_turn(state, input)).await;
        assert!(
            matches!(events[0], StreamEvent::Start { .. }),
            "first event was {:?}",
            events[0]
        );
        assert!(matches!(events[1], StreamEvent::Search { used: false }));
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn regenerate_passes_full_history_to_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let conv = state.store.create("dev", "stub-model", "a");
        state.store.append_message(&conv.id, "dev", Message::user("a"));
        state
            .store
            .append_message(&conv.id, "dev", Message::assistant("b"));

        let (adapter, seen_turns) = StubAdapter::new(vec![
            StreamEvent::Content { content: "b2".into() },
            StreamEvent::Done,
        ]);
        let mut input = turn_input(&conv.id, "a", adapter);
        input.regenerate = true;

        collect_events(run_turn(state.clone(), input)).await;

        // The superseded reply stays in the provider context; the input is
        // re-added as the current turn.
        let texts: Vec<String> = seen_turns
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.text_content())
            .collect();
        assert_eq!(texts, vec!["a", "b", "a"]);

        // No second user message was appended; the fresh reply was.
        let messages = state.store.find_messages(&conv.id, "dev").unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Assistant]);
        assert_eq!(messages[2].content, "b2");
    }

    #[tokio::test]
    async fn persists_exactly_one_assistant_message() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let conv = state.store.create("dev", "stub-model", "hi");

        let (adapter, _) = StubAdapter::new(vec![
            StreamEvent::Content { content: "Hello ".into() },
            StreamEvent::Content { content: "world".into() },
            StreamEvent::debug(&[("totalTokens", json!(7))]),
            StreamEvent::Done,
        ]);
        let input = turn_input(&conv.id, "hi", adapter);

        let events = collect_events(run_turn(state.clone(), input)).await;
        assert!(matches!(events.last(), Some(StreamEvent::Done)));

        let messages = state.store.find_messages(&conv.id, "dev").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello world");
        assert_eq!(messages[1].model.as_deref(), Some("stub-model"));
        let meta = messages[1].metadata.as_ref().unwrap();
        assert_eq!(meta.tokens_used, Some(7));
    }

    #[tokio::test]
    async fn provider_error_discards_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let conv = state.store.create("dev", "stub-model", "hi");

        let (adapter, _) = StubAdapter::new(vec![
            StreamEvent::Content { content: "partial".into() },
            StreamEvent::Error { error: "provider exploded".into() },
        ]);
        let input = turn_input(&conv.id, "hi", adapter);

        let events = collect_events(run_turn(state.clone(), input)).await;
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));

        // Only the user message was persisted.
        let messages = state.store.find_messages(&conv.id, "dev").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
