//! Web search enrichment.
//!
//! Calls the configured search API before generation and renders the hits
//! into a Markdown block injected as a system turn. Search is strictly
//! best-effort: any failure here downgrades the request to a plain
//! generation, it never fails the turn.

use serde_json::Value;

use mm_domain::config::SearchConfig;
use mm_domain::error::Result;
use mm_domain::stream::SearchSource;
use mm_providers::util::{from_reqwest, http_status_error};

/// What a successful search contributes to the turn.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Markdown block injected as a system turn.
    pub context: String,
    pub sources: Vec<SearchSource>,
}

/// Client for the configured search backend.
pub struct SearchClient {
    enabled: bool,
    base_url: String,
    api_key: Option<String>,
    max_results: usize,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn from_config(cfg: &SearchConfig) -> Self {
        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty());
        if cfg.enabled && api_key.is_none() {
            tracing::warn!(
                env = %cfg.api_key_env,
                "search enabled but no API key set; search requests will be skipped"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            enabled: cfg.enabled,
            base_url: cfg.base_url.clone(),
            api_key,
            max_results: cfg.max_results,
            client,
        }
    }

    /// Whether search can actually run (enabled and credentialed).
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }

    /// Run one search and render it for context injection.
    pub async fn run(&self, query: &str) -> Result<SearchOutcome> {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => return Err(mm_domain::error::Error::Config("search API key not set".into())),
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "q": query,
                "size": self.max_results,
            }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_status_error("search", status, &body));
        }

        let body: Value = response.json().await.map_err(from_reqwest)?;
        let sources = parse_sources(&body, self.max_results);
        let context = render_context(query, &body, self.max_results);
        Ok(SearchOutcome { context, sources })
    }
}

/// Pull `{title, url}` pairs out of the response. Hit arrays show up as
/// `webpages` or `results` depending on backend version.
fn parse_sources(body: &Value, max: usize) -> Vec<SearchSource> {
    hits(body)
        .iter()
        .take(max)
        .filter_map(|hit| {
            let title = hit.get("title").and_then(Value::as_str)?;
            let url = hit
                .get("link")
                .or_else(|| hit.get("url"))
                .and_then(Value::as_str)?;
            Some(SearchSource {
                title: title.to_owned(),
                url: url.to_owned(),
            })
        })
        .collect()
}

/// Render the hits as the Markdown system-turn block.
fn render_context(query: &str, body: &Value, max: usize) -> String {
    let mut out = format!("Web search results for \"{query}\":\n");
    for (i, hit) in hits(body).iter().take(max).enumerate() {
        let title = hit.get("title").and_then(Value::as_str).unwrap_or("(untitled)");
        let url = hit
            .get("link")
            .or_else(|| hit.get("url"))
            .and_then(Value::as_str)
            .unwrap_or("");
        out.push_str(&format!("\n{}. **{title}** — {url}\n", i + 1));
        if let Some(snippet) = hit
            .get("snippet")
            .or_else(|| hit.get("content"))
            .and_then(Value::as_str)
        {
            out.push_str(&format!("   {}\n", snippet.trim()));
        }
    }
    out.push_str("\nUse these results to answer; cite sources where relevant.");
    out
}

fn hits(body: &Value) -> Vec<Value> {
    body.get("webpages")
        .or_else(|| body.get("results"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
