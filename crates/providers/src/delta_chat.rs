//! Delta-chat adapter: OpenAI-compatible chat completions.
//!
//! Covers every backend speaking the chat-completions contract: token
//! deltas, `reasoning_content` deltas, inline multimodal parts, tool-call
//! assembly, and a usage-only final chunk. Image-capable models get two
//! extras: the `modalities` request field and a one-shot non-streaming
//! fallback against `/images/generations` when a stream ends without any
//! image artifact.

use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::extract;
use crate::sse::data_payload_stream;
use crate::tools;
use crate::traits::{Completion, GenerateRequest, ProviderAdapter, ToolDefinition};
use crate::util::{from_reqwest, http_status_error, resolve_api_key};
use mm_domain::config::ProviderConfig;
use mm_domain::error::{Error, Result};
use mm_domain::message::{Turn, TurnPart, TurnRole};
use mm_domain::settings::GenerationSettings;
use mm_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeltaChatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    /// Image-capable model: advertise `modalities` and run the
    /// direct-generation fallback on artifact-free streams.
    image_output: bool,
    client: reqwest::Client,
}

impl DeltaChatProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let auth_header = cfg.auth.header.clone().unwrap_or_else(|| "Authorization".into());
        let auth_prefix = cfg.auth.prefix.clone().unwrap_or_else(|| "Bearer ".into());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header,
            auth_prefix,
            image_output: cfg.image_output,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let header_value = format!("{}{}", self.auth_prefix, self.api_key);
        self.client
            .post(url)
            .header(&self.auth_header, &header_value)
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &GenerateRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.turns.iter().map(turn_to_openai).collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });

        apply_sampling(&mut body, &req.settings);

        if self.image_output {
            body["modalities"] = json!(["text", "image"]);
        } else {
            let defs: Vec<Value> = tools::definitions().iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(defs);
        }
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    /// One-shot direct image generation against `/images/generations`.
    /// Only called when a stream or completion for an image-capable model
    /// finished without producing a single image.
    async fn direct_generate_images(&self, model: &str, prompt: &str) -> Result<Vec<String>> {
        let url = format!("{}/images/generations", self.base_url);
        let body = json!({ "model": model, "prompt": prompt });

        tracing::debug!(provider = %self.id, "delta_chat direct image generation fallback");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(http_status_error(&self.id, status, &text));
        }

        let v: Value = serde_json::from_str(&text)?;
        Ok(parse_generated_images(&v))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: TurnRole) -> &'static str {
    match role {
        TurnRole::System => "system",
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
    }
}

fn turn_to_openai(turn: &Turn) -> Value {
    if !turn.has_images() {
        return json!({
            "role": role_to_str(turn.role),
            "content": turn.text_content(),
        });
    }

    let parts: Vec<Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            TurnPart::Text { text } => json!({"type": "text", "text": text}),
            TurnPart::ImageUrl { url } => {
                json!({"type": "image_url", "image_url": {"url": url}})
            }
            TurnPart::InlineImage { mime, data } => json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime};base64,{data}")}
            }),
        })
        .collect();

    json!({
        "role": role_to_str(turn.role),
        "content": parts,
    })
}

/// Sampling knobs go on the wire only when explicitly set.
fn apply_sampling(body: &mut Value, settings: &GenerationSettings) {
    if let Some(t) = settings.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = settings.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(m) = settings.max_tokens {
        body["max_tokens"] = json!(m);
    }
    if let Some(f) = settings.frequency_penalty {
        body["frequency_penalty"] = json!(f);
    }
    if let Some(p) = settings.presence_penalty {
        body["presence_penalty"] = json!(p);
    }
    if let Some(s) = settings.seed {
        body["seed"] = json!(s);
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream chunk parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call assembled from per-index argument deltas.
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    name: String,
    arguments: String,
}

/// Mutable state carried across stream chunks.
#[derive(Default)]
struct ChunkState {
    content: String,
    tool_calls: Vec<PartialToolCall>,
    images: Vec<String>,
    usage: Option<Usage>,
    finished: bool,
}

impl ChunkState {
    /// Fold one parsed chunk into the state, returning the events it
    /// produces immediately (deltas, tool-call starts, usage debug).
    fn apply(&mut self, v: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let choice = v
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|a| a.first());

        let Some(choice) = choice else {
            // Usage-only chunk (stream_options.include_usage).
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                self.usage = Some(usage);
                events.push(usage_debug_event(&usage));
            }
            return events;
        };

        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            self.usage = Some(usage);
            events.push(usage_debug_event(&usage));
        }
        if choice.get("finish_reason").and_then(Value::as_str).is_some() {
            self.finished = true;
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(tc_arr) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc in tc_arr {
                let idx = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                if self.tool_calls.len() <= idx {
                    self.tool_calls.resize(idx + 1, PartialToolCall::default());
                }
                if let Some(name) = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                {
                    self.tool_calls[idx].name = name.to_string();
                    events.push(StreamEvent::ToolCallStart { name: name.to_string() });
                }
                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                {
                    self.tool_calls[idx].arguments.push_str(args);
                }
            }
        }

        if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(StreamEvent::Reasoning { content: text.to_string() });
            }
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                self.content.push_str(text);
                events.push(StreamEvent::Content { content: text.to_string() });
            }
        }

        // Inline image deltas (image-capable chat models).
        if let Some(images) = delta.get("images").and_then(Value::as_array) {
            for entry in images {
                if let Some(url) = image_entry_url(entry) {
                    if !self.images.contains(&url) {
                        self.images.push(url);
                    }
                }
            }
        }

        events
    }

    /// Run completed tool calls; each produces a `tool_result` event and its
    /// output appended to the content accumulator as text.
    fn run_tool_calls(&mut self) -> Vec<StreamEvent> {
        let calls = std::mem::take(&mut self.tool_calls);
        let mut events = Vec::new();
        for call in calls.into_iter().filter(|c| !c.name.is_empty()) {
            let arguments: Value =
                serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
            let result = match tools::execute(&call.name, &arguments) {
                Ok(r) => r,
                Err(e) => format!("tool failed: {e}"),
            };
            events.push(StreamEvent::ToolResult {
                name: call.name.clone(),
                result: result.clone(),
            });
            let appended = format!("\n\n{result}");
            self.content.push_str(&appended);
            events.push(StreamEvent::Content { content: appended });
        }
        events
    }
}

fn image_entry_url(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            let img = obj.get("image_url")?;
            match img {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("url").and_then(Value::as_str).map(String::from),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn usage_debug_event(usage: &Usage) -> StreamEvent {
    StreamEvent::debug(&[
        ("promptTokens", json!(usage.prompt_tokens)),
        ("completionTokens", json!(usage.completion_tokens)),
        ("totalTokens", json!(usage.total_tokens)),
    ])
}

fn parse_generated_images(v: &Value) -> Vec<String> {
    let mut images = Vec::new();
    if let Some(data) = v.get("data").and_then(Value::as_array) {
        for item in data {
            if let Some(b64) = item.get("b64_json").and_then(Value::as_str) {
                images.push(format!("data:image/png;base64,{b64}"));
            } else if let Some(url) = item.get("url").and_then(Value::as_str) {
                images.push(url.to_string());
            }
        }
    }
    images
}

const NO_ARTIFACT_MESSAGE: &str =
    "generation failed: the result contained no output, possibly due to sensitive content";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for DeltaChatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn route(&self) -> &'static str {
        "chat"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, model = %req.model, "delta_chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(http_status_error(&self.id, status, &text));
        }

        let v: Value = serde_json::from_str(&text)?;
        let message = v
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .ok_or_else(|| Error::Protocol {
                provider: self.id.clone(),
                message: "no choices in chat completion response".into(),
            })?;

        let extracted = extract::extract(message);
        let usage = v.get("usage").and_then(parse_usage);

        let mut images = extracted.images;
        if self.image_output && images.is_empty() {
            match self.direct_generate_images(&req.model, &req.last_user_text()).await {
                Ok(generated) => images = generated,
                Err(e) => {
                    tracing::warn!(provider = %self.id, error = %e, "direct image fallback failed");
                }
            }
            if images.is_empty() && extracted.text.is_empty() {
                return Err(Error::ContentPolicy(NO_ARTIFACT_MESSAGE.into()));
            }
        }

        Ok(Completion {
            text: extracted.text,
            reasoning: extracted.reasoning,
            images,
            video: None,
            usage,
        })
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, model = %req.model, "delta_chat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(http_status_error(&self.id, status, &text));
        }

        let provider_id = self.id.clone();
        let image_output = self.image_output;
        let model = req.model.clone();
        let prompt = req.last_user_text();
        let this = self.clone_for_stream();

        let stream = async_stream::stream! {
            let mut payloads = data_payload_stream(resp);
            let mut state = ChunkState::default();

            while let Some(item) = payloads.next().await {
                let data = match item {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if data.trim() == "[DONE]" {
                    break;
                }
                match serde_json::from_str::<Value>(&data) {
                    Ok(v) => {
                        for event in state.apply(&v) {
                            yield Ok(event);
                        }
                        if state.finished && !state.tool_calls.is_empty() {
                            for event in state.run_tool_calls() {
                                yield Ok(event);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(provider = %provider_id, error = %e, "skipping malformed chunk");
                    }
                }
            }

            // Stragglers: tool calls completed by [DONE] without finish_reason.
            for event in state.run_tool_calls() {
                yield Ok(event);
            }

            // Final image list: inline deltas plus anything referenced in
            // the accumulated text.
            extract::scan_text_for_images(&state.content, &mut state.images);

            if state.images.is_empty() && image_output {
                match this.direct_generate_images(&model, &prompt).await {
                    Ok(generated) => state.images = generated,
                    Err(e) => {
                        tracing::warn!(provider = %provider_id, error = %e, "direct image fallback failed");
                    }
                }
                if state.images.is_empty() && state.content.is_empty() {
                    yield Err(Error::ContentPolicy(NO_ARTIFACT_MESSAGE.into()));
                    return;
                }
            }
            if !state.images.is_empty() {
                yield Ok(StreamEvent::Images { images: state.images.clone() });
            }

            yield Ok(StreamEvent::Done);
        };

        Ok(Box::pin(stream))
    }
}

impl DeltaChatProvider {
    /// Cheap handle for use inside the stream body.
    fn clone_for_stream(&self) -> Self {
        Self {
            id: self.id.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            auth_header: self.auth_header.clone(),
            auth_prefix: self.auth_prefix.clone(),
            image_output: self.image_output,
            client: self.client.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
