//! Native-SSE adapter: Gemini-style `generateContent` streaming.
//!
//! The provider speaks raw SSE: each `data:` block is a full JSON response
//! fragment with `candidates[0].content.parts`. Parts flagged `thought`
//! route to the reasoning channel, plain text parts to content, and
//! `inlineData` blobs accumulate into the final image list. `usageMetadata`
//! surfaces as a `debug` event. Malformed blocks are skipped, never fatal.

use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::extract;
use crate::sse::data_payload_stream;
use crate::traits::{Completion, GenerateRequest, ProviderAdapter};
use crate::util::{from_reqwest, http_status_error, redact_url_key, resolve_api_key};
use mm_domain::config::ProviderConfig;
use mm_domain::error::{Error, Result};
use mm_domain::message::{Turn, TurnPart, TurnRole};
use mm_domain::settings::GenerationSettings;
use mm_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NativeSseProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl NativeSseProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        )
    }

    fn build_body(req: &GenerateRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        let mut system_texts: Vec<String> = Vec::new();

        for turn in &req.turns {
            match turn.role {
                TurnRole::System => {
                    let text = turn.text_content();
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                }
                TurnRole::User | TurnRole::Assistant => {
                    let role = if turn.role == TurnRole::User { "user" } else { "model" };
                    contents.push(json!({
                        "role": role,
                        "parts": turn_parts(turn),
                    }));
                }
            }
        }

        let mut body = json!({ "contents": contents });

        if !system_texts.is_empty() {
            body["systemInstruction"] = json!({
                "parts": [{"text": system_texts.join("\n\n")}]
            });
        }

        let gen_config = generation_config(&req.settings);
        if !gen_config.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            body["generationConfig"] = gen_config;
        }
        body
    }
}

fn turn_parts(turn: &Turn) -> Vec<Value> {
    turn.parts
        .iter()
        .map(|part| match part {
            TurnPart::Text { text } => json!({"text": text}),
            TurnPart::InlineImage { mime, data } => json!({
                "inline_data": {"mime_type": mime, "data": data}
            }),
            // Gemini has no URL part; pass the reference through as text so
            // the model at least sees it.
            TurnPart::ImageUrl { url } => json!({"text": url}),
        })
        .collect()
}

fn generation_config(settings: &GenerationSettings) -> Value {
    let mut cfg = json!({});
    if let Some(t) = settings.temperature {
        cfg["temperature"] = json!(t);
    }
    if let Some(p) = settings.top_p {
        cfg["topP"] = json!(p);
    }
    if let Some(m) = settings.max_tokens {
        cfg["maxOutputTokens"] = json!(m);
    }
    if let Some(s) = settings.seed {
        cfg["seed"] = json!(s);
    }
    cfg
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE block parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events and image accumulation from one parsed SSE block.
fn parse_block(v: &Value, images: &mut Vec<String>) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    let parts = v
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array);

    if let Some(parts) = parts {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if text.is_empty() {
                    continue;
                }
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    events.push(StreamEvent::Reasoning { content: text.to_string() });
                } else {
                    events.push(StreamEvent::Content { content: text.to_string() });
                }
                continue;
            }
            for key in ["inlineData", "inline_data"] {
                if let Some(inline) = part.get(key).and_then(Value::as_object) {
                    let mime = ["mimeType", "mime_type"]
                        .iter()
                        .find_map(|k| inline.get(*k).and_then(Value::as_str))
                        .unwrap_or("image/png");
                    if let Some(data) = inline.get("data").and_then(Value::as_str) {
                        let url = format!("data:{mime};base64,{data}");
                        if !images.contains(&url) {
                            images.push(url);
                        }
                    }
                }
            }
        }
    }

    if let Some(usage) = v.get("usageMetadata") {
        if let Some(u) = parse_usage_metadata(usage) {
            events.push(StreamEvent::debug(&[
                ("promptTokens", json!(u.prompt_tokens)),
                ("completionTokens", json!(u.completion_tokens)),
                ("totalTokens", json!(u.total_tokens)),
            ]));
        }
    }

    events
}

fn parse_usage_metadata(v: &Value) -> Option<Usage> {
    let prompt = v.get("promptTokenCount").and_then(Value::as_u64)? as u32;
    let candidates = v
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let total = v
        .get("totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or((prompt + candidates) as u64) as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: candidates,
        total_tokens: total,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for NativeSseProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn route(&self) -> &'static str {
        "native"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<Completion> {
        let url = self.generate_url(&req.model);
        let body = Self::build_body(req);

        tracing::debug!(provider = %self.id, url = %redact_url_key(&url), "native_sse request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
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
        let content = v
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|c| c.get("content"))
            .ok_or_else(|| Error::Protocol {
                provider: self.id.clone(),
                message: "no candidates in generateContent response".into(),
            })?;

        let extracted = extract::extract(content);
        let usage = v.get("usageMetadata").and_then(parse_usage_metadata);

        Ok(Completion {
            text: extracted.text,
            reasoning: extracted.reasoning,
            images: extracted.images,
            video: None,
            usage,
        })
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.stream_url(&req.model);
        let body = Self::build_body(req);

        tracing::debug!(provider = %self.id, url = %redact_url_key(&url), "native_sse stream request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
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
        let stream = async_stream::stream! {
            let mut payloads = data_payload_stream(resp);
            let mut images: Vec<String> = Vec::new();
            let mut skipped = 0usize;

            while let Some(item) = payloads.next().await {
                let data = match item {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                match serde_json::from_str::<Value>(&data) {
                    Ok(v) => {
                        for event in parse_block(&v, &mut images) {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(
                            provider = %provider_id,
                            error = %e,
                            skipped,
                            "skipping malformed SSE block"
                        );
                    }
                }
            }

            if !images.is_empty() {
                yield Ok(StreamEvent::Images { images: images.clone() });
            }
            yield Ok(StreamEvent::Done);
        };

        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thought_parts_route_to_reasoning() {
        let mut images = Vec::new();
        let events = parse_block(
            &json!({"candidates": [{"content": {"parts": [
                {"text": "pondering", "thought": true},
                {"text": "answer"}
            ]}}]}),
            &mut images,
        );
        assert!(matches!(&events[0], StreamEvent::Reasoning { content } if content == "pondering"));
        assert!(matches!(&events[1], StreamEvent::Content { content } if content == "answer"));
    }

    #[test]
    fn inline_data_accumulates_images_without_events() {
        let mut images = Vec::new();
        let events = parse_block(
            &json!({"candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "QUJD"}}
            ]}}]}),
            &mut images,
        );
        assert!(events.is_empty());
        assert_eq!(images, vec!["data:image/png;base64,QUJD"]);
    }

    #[test]
    fn usage_metadata_becomes_debug_event() {
        let mut images = Vec::new();
        let events = parse_block(
            &json!({"usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 34,
                "totalTokenCount": 46
            }}),
            &mut images,
        );
        match &events[0] {
            StreamEvent::Debug { data } => assert_eq!(data["totalTokens"], 46),
            other => panic!("expected debug event, got {other:?}"),
        }
    }

    #[test]
    fn body_separates_system_instruction_from_contents() {
        let req = GenerateRequest {
            model: "gem".into(),
            turns: vec![
                Turn::text(TurnRole::System, "be brief"),
                Turn::text(TurnRole::User, "hi"),
                Turn::text(TurnRole::Assistant, "hello"),
            ],
            settings: GenerationSettings::default(),
        };
        let body = NativeSseProvider::build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn generation_config_only_when_settings_set() {
        let req = GenerateRequest {
            model: "gem".into(),
            turns: vec![Turn::text(TurnRole::User, "hi")],
            settings: GenerationSettings {
                temperature: Some(0.3),
                max_tokens: Some(256),
                ..Default::default()
            },
        };
        let body = NativeSseProvider::build_body(&req);
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn inline_images_render_as_inline_data_parts() {
        let turn = Turn {
            role: TurnRole::User,
            parts: vec![
                TurnPart::Text { text: "edit this".into() },
                TurnPart::InlineImage { mime: "image/jpeg".into(), data: "QUJD".into() },
            ],
        };
        let parts = turn_parts(&turn);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
    }
}
