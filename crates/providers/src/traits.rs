use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mm_domain::error::Result;
use mm_domain::message::Turn;
use mm_domain::settings::GenerationSettings;
use mm_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic generation request: the assembled context plus the
/// resolved model and per-request settings.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub settings: GenerationSettings,
}

impl GenerateRequest {
    /// Text of the most recent user turn; what the direct-generation
    /// fallback and the video submit body use as the prompt.
    pub fn last_user_text(&self) -> String {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == mm_domain::message::TurnRole::User)
            .map(|t| t.text_content())
            .unwrap_or_default()
    }
}

/// Result of a non-streaming generation round-trip.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub reasoning: Option<String>,
    pub images: Vec<String>,
    pub video: Option<String>,
    pub usage: Option<Usage>,
}

/// Tool definition exposed to delta-chat providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Common interface implemented by the three adapter families.
///
/// `generate_stream` yields canonical [`StreamEvent`]s; the terminal
/// `done`/`error` framing is owned by the gateway pipeline, so adapters end
/// their streams with `Done` on success and `Err(_)` on failure.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Config id of this provider instance.
    fn id(&self) -> &str;

    /// Adapter family tag reported in the `start` event:
    /// "chat", "native", or "task".
    fn route(&self) -> &'static str;

    /// One-shot, non-streaming generation. Also serves as the target of the
    /// mid-stream transport fallback.
    async fn generate(&self, req: &GenerateRequest) -> Result<Completion>;

    /// Streaming generation.
    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
