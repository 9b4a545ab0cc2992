use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::SearchSource;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted conversation model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Function,
}

/// A stored chat message.
///
/// `images`/`videos` are `None` rather than `Some(vec![])` when absent; the
/// store enforces this on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            model: None,
            images: None,
            videos: None,
            metadata: None,
        }
    }

    /// Attach images, normalizing an empty list to `None`.
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = if images.is_empty() { None } else { Some(images) };
        self
    }

    /// Attach videos, normalizing an empty list to `None`.
    pub fn with_videos(mut self, videos: Vec<String>) -> Self {
        self.videos = if videos.is_empty() { None } else { Some(videos) };
        self
    }
}

/// Sidecar data persisted with an assistant message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_used: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SearchSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_none()
            && self.search_used.is_none()
            && self.sources.is_none()
            && self.tokens_used.is_none()
    }
}

/// A conversation owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-agnostic context turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Role of a rendered context turn. `function` messages never reach
/// providers, so there is no variant for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// A single part of a rendered turn. Every adapter converts these into its
/// provider's wire shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPart {
    Text { text: String },
    /// A plain http(s) image URL.
    ImageUrl { url: String },
    /// Base64 image bytes with their mime type (decoded from a data URL).
    InlineImage { mime: String, data: String },
}

/// One provider-ready turn of the assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
}

impl Turn {
    pub fn text(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![TurnPart::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let TurnPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn has_images(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, TurnPart::ImageUrl { .. } | TurnPart::InlineImage { .. }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_images_normalizes_empty_to_none() {
        let msg = Message::assistant("hi").with_images(vec![]);
        assert!(msg.images.is_none());

        let msg = Message::assistant("hi").with_images(vec!["a".into()]);
        assert_eq!(msg.images.as_deref(), Some(&["a".to_string()][..]));
    }

    #[test]
    fn message_serializes_camel_case_and_skips_absent_fields() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("images").is_none());
        assert!(json.get("metadata").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn turn_text_content_joins_text_parts() {
        let turn = Turn {
            role: TurnRole::User,
            parts: vec![
                TurnPart::Text { text: "a".into() },
                TurnPart::ImageUrl { url: "http://x/i.png".into() },
                TurnPart::Text { text: "b".into() },
            ],
        };
        assert_eq!(turn.text_content(), "a\nb");
        assert!(turn.has_images());
    }
}
