//! Async-task adapter: submit-then-poll video generation.
//!
//! The backend accepts a generation task, returns a task id, and is polled
//! until it reaches a terminal status. Every non-terminal poll surfaces a
//! `debug` heartbeat so clients can show progress. A succeeded task without
//! a video URL — or a submit response without a task id — is a protocol
//! violation and fails the request outright.

use serde_json::{json, Value};
use std::time::Duration;

use crate::traits::{Completion, GenerateRequest, ProviderAdapter};
use crate::util::{from_reqwest, http_status_error, resolve_api_key};
use mm_domain::config::ProviderConfig;
use mm_domain::error::{Error, Result};
use mm_domain::message::{TurnPart, TurnRole};
use mm_domain::settings::VideoSettings;
use mm_domain::stream::{BoxStream, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VideoTaskProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    poll_interval: Duration,
    max_polls: u32,
}

/// Terminal poll outcome.
enum TaskState {
    Pending(String),
    Succeeded(Value),
    Failed { status: String, reason: Option<String> },
}

impl VideoTaskProvider {
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
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            max_polls: cfg.max_polls,
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}/contents/generations/tasks", self.base_url)
    }

    /// SUBMIT: create the generation task, returning its id.
    async fn submit(&self, req: &GenerateRequest) -> Result<String> {
        let prompt = format!(
            "{}{}",
            req.last_user_text(),
            req.settings
                .video
                .as_ref()
                .map(settings_suffix)
                .unwrap_or_default()
        );

        let mut content = vec![json!({"type": "text", "text": prompt})];
        if let Some(image) = request_image(req) {
            content.push(json!({"type": "image_url", "image_url": {"url": image}}));
        }
        let body = json!({ "model": req.model, "content": content });

        tracing::debug!(provider = %self.id, model = %req.model, "video task submit");

        let resp = self
            .client
            .post(self.tasks_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        extract_task_id(&v).ok_or_else(|| Error::Protocol {
            provider: self.id.clone(),
            message: "task creation response carried no task id".into(),
        })
    }

    /// POLL: fetch the task once and classify its status.
    async fn poll(&self, task_id: &str) -> Result<TaskState> {
        let url = format!("{}/{}", self.tasks_url(), task_id);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(http_status_error(&self.id, status, &text));
        }

        let v: Value = serde_json::from_str(&text)?;
        let task_status = v
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(match task_status.as_str() {
            "succeeded" => TaskState::Succeeded(v),
            "failed" | "cancelled" => TaskState::Failed {
                status: task_status,
                reason: extract_failure_reason(&v),
            },
            _ => TaskState::Pending(task_status),
        })
    }

    fn video_url_from(&self, v: &Value) -> Result<String> {
        extract_video_url(v).ok_or_else(|| Error::Protocol {
            provider: self.id.clone(),
            message: "task succeeded but carried no video URL".into(),
        })
    }

    fn clone_for_stream(&self) -> Self {
        Self {
            id: self.id.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            client: self.client.clone(),
            poll_interval: self.poll_interval,
            max_polls: self.max_polls,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Task id location varies by backend revision: `id`, `data.id`, `task_id`.
fn extract_task_id(v: &Value) -> Option<String> {
    v.get("id")
        .and_then(Value::as_str)
        .or_else(|| v.get("data").and_then(|d| d.get("id")).and_then(Value::as_str))
        .or_else(|| v.get("task_id").and_then(Value::as_str))
        .map(String::from)
}

/// Video URL location also varies: `content.video_url`, `content.video.url`,
/// top-level `video_url`.
fn extract_video_url(v: &Value) -> Option<String> {
    let content = v.get("content");
    content
        .and_then(|c| c.get("video_url"))
        .and_then(Value::as_str)
        .or_else(|| {
            content
                .and_then(|c| c.get("video"))
                .and_then(|vid| vid.get("url"))
                .and_then(Value::as_str)
        })
        .or_else(|| v.get("video_url").and_then(Value::as_str))
        .map(String::from)
}

fn extract_failure_reason(v: &Value) -> Option<String> {
    for path in [&["error", "message"][..], &["failure_reason"], &["message"]] {
        let mut cur = v;
        let mut ok = true;
        for key in path {
            match cur.get(key) {
                Some(next) => cur = next,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            if let Some(s) = cur.as_str() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Render explicitly-set video settings as prompt suffix flags.
fn settings_suffix(video: &VideoSettings) -> String {
    let mut suffix = String::new();
    if let Some(ratio) = &video.ratio {
        suffix.push_str(&format!(" --ratio {ratio}"));
    }
    if let Some(duration) = video.duration {
        suffix.push_str(&format!(" --duration {duration}"));
    }
    if let Some(resolution) = &video.resolution {
        suffix.push_str(&format!(" --resolution {resolution}"));
    }
    if let Some(watermark) = video.watermark {
        suffix.push_str(&format!(" --watermark {watermark}"));
    }
    if let Some(camera_fixed) = video.camera_fixed {
        suffix.push_str(&format!(" --camerafixed {camera_fixed}"));
    }
    if let Some(seed) = video.seed {
        suffix.push_str(&format!(" --seed {seed}"));
    }
    suffix
}

/// First image attached to the most recent user turn, if any.
fn request_image(req: &GenerateRequest) -> Option<String> {
    let turn = req.turns.iter().rev().find(|t| t.role == TurnRole::User)?;
    turn.parts.iter().find_map(|p| match p {
        TurnPart::ImageUrl { url } => Some(url.clone()),
        TurnPart::InlineImage { mime, data } => Some(format!("data:{mime};base64,{data}")),
        TurnPart::Text { .. } => None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for VideoTaskProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn route(&self) -> &'static str {
        "task"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<Completion> {
        let task_id = self.submit(req).await?;
        let mut polls = 0u32;

        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.poll(&task_id).await? {
                TaskState::Succeeded(v) => {
                    let url = self.video_url_from(&v)?;
                    return Ok(Completion {
                        video: Some(url),
                        ..Default::default()
                    });
                }
                TaskState::Failed { status, reason } => {
                    return Err(Error::Other(format!(
                        "video generation {status}: {}",
                        reason.unwrap_or_else(|| "no reason given".into())
                    )));
                }
                TaskState::Pending(_) => {
                    polls += 1;
                    if polls >= self.max_polls {
                        return Err(Error::Timeout(format!(
                            "video task {task_id} still pending after {polls} polls"
                        )));
                    }
                }
            }
        }
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let this = self.clone_for_stream();
        let task_id = self.submit(req).await?;

        let stream = async_stream::stream! {
            yield Ok(StreamEvent::debug(&[("taskId", json!(task_id))]));

            let mut polls = 0u32;
            loop {
                tokio::time::sleep(this.poll_interval).await;
                match this.poll(&task_id).await {
                    Ok(TaskState::Succeeded(v)) => {
                        match this.video_url_from(&v) {
                            Ok(url) => {
                                yield Ok(StreamEvent::Video { url });
                                yield Ok(StreamEvent::Done);
                            }
                            Err(e) => yield Err(e),
                        }
                        return;
                    }
                    Ok(TaskState::Failed { status, reason }) => {
                        yield Err(Error::Other(format!(
                            "video generation {status}: {}",
                            reason.unwrap_or_else(|| "no reason given".into())
                        )));
                        return;
                    }
                    Ok(TaskState::Pending(status)) => {
                        polls += 1;
                        yield Ok(StreamEvent::debug(&[
                            ("status", json!(status)),
                            ("polls", json!(polls)),
                        ]));
                        if polls >= this.max_polls {
                            yield Err(Error::Timeout(format!(
                                "video task {task_id} still pending after {polls} polls"
                            )));
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
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
    use mm_domain::message::Turn;
    use mm_domain::settings::GenerationSettings;

    #[test]
    fn task_id_from_all_three_locations() {
        assert_eq!(extract_task_id(&json!({"id": "t1"})).as_deref(), Some("t1"));
        assert_eq!(
            extract_task_id(&json!({"data": {"id": "t2"}})).as_deref(),
            Some("t2")
        );
        assert_eq!(
            extract_task_id(&json!({"task_id": "t3"})).as_deref(),
            Some("t3")
        );
        assert!(extract_task_id(&json!({"status": "queued"})).is_none());
    }

    #[test]
    fn video_url_from_all_three_locations() {
        assert_eq!(
            extract_video_url(&json!({"content": {"video_url": "u1"}})).as_deref(),
            Some("u1")
        );
        assert_eq!(
            extract_video_url(&json!({"content": {"video": {"url": "u2"}}})).as_deref(),
            Some("u2")
        );
        assert_eq!(
            extract_video_url(&json!({"video_url": "u3"})).as_deref(),
            Some("u3")
        );
        assert!(extract_video_url(&json!({"status": "succeeded"})).is_none());
    }

    #[test]
    fn settings_suffix_only_includes_set_flags() {
        assert_eq!(settings_suffix(&VideoSettings::default()), "");

        let suffix = settings_suffix(&VideoSettings {
            ratio: Some("16:9".into()),
            duration: Some(5),
            watermark: Some(false),
            ..Default::default()
        });
        assert_eq!(suffix, " --ratio 16:9 --duration 5 --watermark false");
    }

    #[test]
    fn failure_reason_from_error_message() {
        assert_eq!(
            extract_failure_reason(&json!({"error": {"message": "nsfw"}})).as_deref(),
            Some("nsfw")
        );
        assert_eq!(
            extract_failure_reason(&json!({"failure_reason": "quota"})).as_deref(),
            Some("quota")
        );
        assert!(extract_failure_reason(&json!({})).is_none());
    }

    #[test]
    fn request_image_prefers_last_user_turn() {
        let req = GenerateRequest {
            model: "vid".into(),
            turns: vec![
                Turn {
                    role: TurnRole::User,
                    parts: vec![TurnPart::ImageUrl { url: "https://x/old.png".into() }],
                },
                Turn::text(TurnRole::Assistant, "ok"),
                Turn {
                    role: TurnRole::User,
                    parts: vec![
                        TurnPart::Text { text: "animate".into() },
                        TurnPart::ImageUrl { url: "https://x/new.png".into() },
                    ],
                },
            ],
            settings: GenerationSettings::default(),
        };
        assert_eq!(request_image(&req).as_deref(), Some("https://x/new.png"));
    }
}
