use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthUsersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Registered providers (data-driven: adding a backend = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Model used when a request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Cap on concurrently served requests.
    #[serde(default = "d_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            max_concurrency: d_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bearer-token auth table. Each entry maps one token (read from an env var
/// at startup, hashed, never kept in plain text) to an owner id. An empty
/// table means dev mode: requests authenticate as `owner_id = "dev"`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthUsersConfig {
    #[serde(default)]
    pub users: Vec<UserTokenConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTokenConfig {
    /// Owner id attached to requests authenticated with this token.
    pub id: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage / history / search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `conversations.json`.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Context window: number of stored messages sent to the provider.
    #[serde(default = "d_max_history")]
    pub max_messages: usize,
    /// When the current user turn carries no image, reuse the images of the
    /// most recent assistant message that has any.
    #[serde(default = "d_true")]
    pub carry_forward_images: bool,
    /// System preamble placed at the head of every context.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: d_max_history(),
            carry_forward_images: true,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_search_url")]
    pub base_url: String,
    /// Environment variable holding the search API key.
    #[serde(default = "d_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_search_results")]
    pub max_results: usize,
    #[serde(default = "d_search_timeout")]
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: d_search_url(),
            api_key_env: d_search_key_env(),
            max_results: d_search_results(),
            timeout_ms: d_search_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "pretty" or "json".
    #[serde(default = "d_log_format")]
    pub log_format: String,
    /// OTLP gRPC endpoint; traces are exported only when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: d_log_format(),
            otlp_endpoint: None,
            service_name: d_service_name(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: ProviderAuthConfig,
    /// Model ids served by this provider.
    #[serde(default)]
    pub models: Vec<String>,
    /// Whether the model emits images (enables the one-shot direct
    /// generation fallback and the zero-artifact policy check).
    #[serde(default)]
    pub image_output: bool,
    /// Async-task polling interval.
    #[serde(default = "d_poll_interval")]
    pub poll_interval_ms: u64,
    /// Async-task poll cap; exceeding it fails the request as a timeout.
    /// ~30 minutes at the default interval.
    #[serde(default = "d_max_polls")]
    pub max_polls: u32,
    /// Per-request HTTP timeout.
    #[serde(default = "d_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (token deltas).
    DeltaChat,
    /// Gemini-style generateContent raw SSE.
    NativeSse,
    /// Submit-then-poll video generation.
    VideoTask,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderAuthConfig {
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Keychain service name.
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name.
    #[serde(default)]
    pub account: Option<String>,
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3310
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_concurrency() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_max_history() -> usize {
    30
}
fn d_true() -> bool {
    true
}
fn d_search_url() -> String {
    "https://metaso.cn/api/v1/search".into()
}
fn d_search_key_env() -> String {
    "MM_SEARCH_API_KEY".into()
}
fn d_search_results() -> usize {
    5
}
fn d_search_timeout() -> u64 {
    10_000
}
fn d_log_format() -> String {
    "pretty".into()
}
fn d_service_name() -> String {
    "modelmux".into()
}
fn d_poll_interval() -> u64 {
    10_000
}
fn d_max_polls() -> u32 {
    180
}
fn d_timeout() -> u64 {
    120_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    /// Empty vec = everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "providers".into(),
                message: "no providers configured".into(),
            });
        }
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.id.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }
            if provider.models.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("providers[{i}].models"),
                    message: "provider serves no models and will never be selected".into(),
                });
            }
        }

        if let Some(model) = &self.default_model {
            let known = self
                .providers
                .iter()
                .any(|p| p.models.iter().any(|m| m == model));
            if !known {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "default_model".into(),
                    message: format!("\"{model}\" is not served by any configured provider"),
                });
            }
        }

        if self.auth.users.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "auth.users".into(),
                message: "no user tokens configured; running in dev mode".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        issues
    }

    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 3310);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.history.max_messages, 30);
        assert!(cfg.history.carry_forward_images);
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn provider_config_parses() {
        let cfg: Config = toml::from_str(
            r#"
            default_model = "pix-chat"

            [[providers]]
            id = "pix"
            kind = "delta_chat"
            base_url = "https://api.example.com/v1"
            models = ["pix-chat"]
            image_output = true

            [providers.auth]
            env = "PIX_API_KEY"
            "#,
        )
        .unwrap();
        let p = &cfg.providers[0];
        assert_eq!(p.kind, ProviderKind::DeltaChat);
        assert!(p.image_output);
        assert_eq!(p.poll_interval_ms, 10_000);
        assert_eq!(p.max_polls, 180);
        assert!(cfg.validate().iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn unknown_default_model_is_an_error() {
        let cfg: Config = toml::from_str(
            r#"
            default_model = "ghost"

            [[providers]]
            id = "pix"
            kind = "native_sse"
            base_url = "https://api.example.com"
            models = ["real-model"]
            "#,
        )
        .unwrap();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "default_model"));
    }

    #[test]
    fn zero_port_is_an_error() {
        let cfg: Config = toml::from_str("[server]\nport = 0\n").unwrap();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "server.port"));
    }
}
