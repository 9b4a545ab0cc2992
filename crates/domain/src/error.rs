/// Shared error type used across all ModelMux crates.
///
/// The variants split along how the gateway must react:
/// - `Request`/`Auth` map to HTTP 400/401 before a stream is committed.
/// - `Transport`/`Timeout` are retryable; mid-stream they make the request
///   eligible for the one-shot non-streaming fallback.
/// - `Protocol` means the provider broke its own contract. Fatal; never
///   retried and never falls back.
/// - `ContentPolicy` is a successful provider round-trip that produced zero
///   artifacts for an artifact-expecting request.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad request: {0}")]
    Request(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider} violated its protocol: {message}")]
    Protocol { provider: String, message: String },

    #[error("{0}")]
    ContentPolicy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a streaming request hitting this error may fall back to a
    /// single non-streaming completion.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
