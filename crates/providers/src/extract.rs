//! Content extraction from provider message payloads.
//!
//! Providers disagree wildly about where generated text and images live:
//! plain `content` strings, typed part arrays, Gemini `inlineData` blobs,
//! legacy `multi_mod_content` arrays, top-level `images` lists, or image
//! URLs buried inside Markdown text. [`extract`] walks all of them and
//! returns one normalized result.
//!
//! The function is pure and idempotent: feeding a message rebuilt from its
//! own output discovers nothing new.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Normalized content pulled out of one provider message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Deduplicated text fragments in first-seen order, joined with `\n`.
    pub text: String,
    /// Deduplicated image URLs / data URLs in first-seen order.
    pub images: Vec<String>,
    /// Reasoning text, when the provider surfaces any.
    pub reasoning: Option<String>,
}

#[derive(Default)]
struct Accumulator {
    texts: Vec<String>,
    text_seen: HashSet<String>,
    images: Vec<String>,
    image_seen: HashSet<String>,
    reasoning: Vec<String>,
}

impl Accumulator {
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.text_seen.insert(text.to_owned()) {
            self.texts.push(text.to_owned());
        }
    }

    fn push_image(&mut self, url: impl Into<String>) {
        let url = url.into();
        if url.is_empty() {
            return;
        }
        if self.image_seen.insert(url.clone()) {
            self.images.push(url);
        }
    }

    fn push_reasoning(&mut self, text: &str) {
        if !text.is_empty() {
            self.reasoning.push(text.to_owned());
        }
    }
}

/// Extract text, images, and reasoning from a provider "message" value.
///
/// Works on chat-completion messages, stream deltas, and Gemini `content`
/// objects alike; unknown shapes contribute nothing rather than failing.
pub fn extract(message: &Value) -> Extracted {
    let mut acc = Accumulator::default();

    if let Some(content) = message.get("content") {
        collect_content(content, &mut acc);
    }

    // Gemini content objects keep their parts under `parts`.
    if let Some(parts) = message.get("parts").and_then(Value::as_array) {
        for part in parts {
            collect_part(part, &mut acc);
        }
    }

    // Legacy multimodal field still emitted by some OpenAI-compatible hosts.
    if let Some(parts) = message.get("multi_mod_content").and_then(Value::as_array) {
        for part in parts {
            collect_part(part, &mut acc);
        }
    }

    // Top-level image list.
    if let Some(images) = message.get("images").and_then(Value::as_array) {
        for img in images {
            collect_image_entry(img, &mut acc);
        }
    }

    for key in ["reasoning_content", "reasoning"] {
        if let Some(r) = message.get(key).and_then(Value::as_str) {
            acc.push_reasoning(r);
        }
    }

    let text = acc.texts.join("\n");
    scan_text(&text, &mut acc);

    let reasoning = if acc.reasoning.is_empty() {
        None
    } else {
        Some(acc.reasoning.join("\n"))
    };

    Extracted {
        text,
        images: acc.images,
        reasoning,
    }
}

/// Find image references inside free text: base64 data URLs, Markdown image
/// syntax, and bare http(s) URLs with an image extension. The text itself is
/// left untouched.
pub fn scan_text_for_images(text: &str, found: &mut Vec<String>) -> usize {
    let mut acc = Accumulator::default();
    for url in found.iter() {
        acc.push_image(url.clone());
    }
    let before = acc.images.len();
    scan_text(text, &mut acc);
    let added = acc.images.len() - before;
    *found = acc.images;
    added
}

// ── Internal collectors ─────────────────────────────────────────────

fn collect_content(content: &Value, acc: &mut Accumulator) {
    match content {
        Value::String(s) => acc.push_text(s),
        Value::Array(parts) => {
            for part in parts {
                collect_part(part, acc);
            }
        }
        _ => {}
    }
}

fn collect_part(part: &Value, acc: &mut Accumulator) {
    if let Some(s) = part.as_str() {
        acc.push_text(s);
        return;
    }
    let Some(obj) = part.as_object() else {
        return;
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("text") | Some("output_text") => {
            if let Some(t) = obj.get("text").and_then(Value::as_str) {
                acc.push_text(t);
            }
        }
        Some("image_url") => {
            collect_image_entry(obj.get("image_url").unwrap_or(&Value::Null), acc);
        }
        Some("output_image") | Some("image") => {
            collect_encoded_image(obj, acc);
        }
        Some("thought") => {
            if let Some(t) = obj.get("text").and_then(Value::as_str) {
                acc.push_reasoning(t);
            }
        }
        _ => {
            // Untyped parts: Gemini-style `{text}` / `{inlineData: {...}}`.
            if let Some(t) = obj.get("text").and_then(Value::as_str) {
                if obj.get("thought").and_then(Value::as_bool) == Some(true) {
                    acc.push_reasoning(t);
                } else {
                    acc.push_text(t);
                }
                return;
            }
            for key in ["inlineData", "inline_data"] {
                if let Some(inline) = obj.get(key) {
                    collect_inline_data(inline, acc);
                    return;
                }
            }
            if let Some(img) = obj.get("image_url") {
                collect_image_entry(img, acc);
            }
        }
    }

    // Typed parts may still carry Gemini inline data next to the type tag.
    for key in ["inlineData", "inline_data"] {
        if let Some(inline) = obj.get(key) {
            collect_inline_data(inline, acc);
        }
    }
}

/// An image reference that is either a bare string or a `{url}` object.
fn collect_image_entry(value: &Value, acc: &mut Accumulator) {
    match value {
        Value::String(url) => acc.push_image(url.clone()),
        Value::Object(obj) => {
            if let Some(url) = obj.get("url").and_then(Value::as_str) {
                acc.push_image(url);
            } else if let Some(inner) = obj.get("image_url") {
                collect_image_entry(inner, acc);
            }
        }
        _ => {}
    }
}

/// Base64 image payloads: `b64_json` | `base64_data` | `data`, mime under
/// `mime_type` | `mimeType`, defaulting to image/png.
fn collect_encoded_image(obj: &serde_json::Map<String, Value>, acc: &mut Accumulator) {
    if let Some(url) = obj.get("url").and_then(Value::as_str) {
        acc.push_image(url);
        return;
    }
    let data = ["b64_json", "base64_data", "data"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str));
    let Some(data) = data else {
        return;
    };
    if data.starts_with("data:") {
        acc.push_image(data);
        return;
    }
    let mime = ["mime_type", "mimeType"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or("image/png");
    acc.push_image(format!("data:{mime};base64,{data}"));
}

/// Gemini `inlineData` / `inline_data` blobs.
fn collect_inline_data(value: &Value, acc: &mut Accumulator) {
    let Some(obj) = value.as_object() else {
        return;
    };
    let mime = ["mimeType", "mime_type"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or("image/png");
    if let Some(data) = obj.get("data").and_then(Value::as_str) {
        if !data.is_empty() {
            acc.push_image(format!("data:{mime};base64,{data}"));
        }
    }
}

// ── Text scanning ───────────────────────────────────────────────────

fn data_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn markdown_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"!\[[^\]]*\]\(\s*([^)\s]+)\s*\)")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn bare_image_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)https?://[^\s<>()\[\]"']+\.(?:png|jpe?g|gif|webp|bmp|svg)(?:\?[^\s<>()\[\]"']*)?"#,
        )
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

fn scan_text(text: &str, acc: &mut Accumulator) {
    if text.is_empty() {
        return;
    }
    for m in data_url_re().find_iter(text) {
        acc.push_image(m.as_str());
    }
    for cap in markdown_image_re().captures_iter(text) {
        if let Some(url) = cap.get(1) {
            acc.push_image(url.as_str());
        }
    }
    for m in bare_image_url_re().find_iter(text) {
        acc.push_image(m.as_str());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_content() {
        let out = extract(&json!({"content": "hello"}));
        assert_eq!(out.text, "hello");
        assert!(out.images.is_empty());
        assert!(out.reasoning.is_none());
    }

    #[test]
    fn typed_text_parts_dedup_first_seen_order() {
        let out = extract(&json!({
            "content": [
                {"type": "text", "text": "alpha"},
                {"type": "output_text", "text": "beta"},
                {"type": "text", "text": "alpha"},
            ]
        }));
        assert_eq!(out.text, "alpha\nbeta");
    }

    #[test]
    fn image_url_part_string_and_object_forms() {
        let out = extract(&json!({
            "content": [
                {"type": "image_url", "image_url": "https://x/a.png"},
                {"type": "image_url", "image_url": {"url": "https://x/b.png"}},
            ]
        }));
        assert_eq!(out.images, vec!["https://x/a.png", "https://x/b.png"]);
    }

    #[test]
    fn output_image_and_image_b64_variants() {
        let out = extract(&json!({
            "content": [
                {"type": "output_image", "data": "AAAA", "mime_type": "image/webp"},
                {"type": "image", "b64_json": "BBBB"},
                {"type": "image", "base64_data": "CCCC", "mimeType": "image/jpeg"},
            ]
        }));
        assert_eq!(
            out.images,
            vec![
                "data:image/webp;base64,AAAA",
                "data:image/png;base64,BBBB",
                "data:image/jpeg;base64,CCCC",
            ]
        );
    }

    #[test]
    fn gemini_inline_data_both_casings() {
        let out = extract(&json!({
            "content": [
                {"inlineData": {"mimeType": "image/png", "data": "XXXX"}},
                {"inline_data": {"mime_type": "image/gif", "data": "YYYY"}},
            ]
        }));
        assert_eq!(
            out.images,
            vec!["data:image/png;base64,XXXX", "data:image/gif;base64,YYYY"]
        );
    }

    #[test]
    fn gemini_parts_field_with_thought_flag() {
        let out = extract(&json!({
            "parts": [
                {"text": "thinking about it", "thought": true},
                {"text": "the answer"},
            ]
        }));
        assert_eq!(out.text, "the answer");
        assert_eq!(out.reasoning.as_deref(), Some("thinking about it"));
    }

    #[test]
    fn legacy_multi_mod_content() {
        let out = extract(&json!({
            "content": "caption",
            "multi_mod_content": [
                {"type": "text", "text": "extra"},
                {"type": "image_url", "image_url": {"url": "https://x/m.png"}},
            ]
        }));
        assert_eq!(out.text, "caption\nextra");
        assert_eq!(out.images, vec!["https://x/m.png"]);
    }

    #[test]
    fn top_level_images_array() {
        let out = extract(&json!({
            "content": "hi",
            "images": ["https://x/1.png", {"image_url": {"url": "https://x/2.png"}}]
        }));
        assert_eq!(out.images, vec!["https://x/1.png", "https://x/2.png"]);
    }

    #[test]
    fn reasoning_content_field() {
        let out = extract(&json!({"content": "x", "reasoning_content": "because"}));
        assert_eq!(out.reasoning.as_deref(), Some("because"));
    }

    #[test]
    fn scans_markdown_and_bare_urls_and_data_urls() {
        let out = extract(&json!({
            "content": "look ![pic](https://x/md.png) and https://x/bare.JPG plus data:image/png;base64,QUJD end"
        }));
        assert_eq!(
            out.images,
            vec![
                "data:image/png;base64,QUJD",
                "https://x/md.png",
                "https://x/bare.JPG",
            ]
        );
        // Text is left untouched.
        assert!(out.text.contains("![pic]"));
    }

    #[test]
    fn non_image_urls_not_scanned() {
        let out = extract(&json!({
            "content": "see https://example.com/page.html and https://x/file.pdf"
        }));
        assert!(out.images.is_empty());
    }

    #[test]
    fn images_dedup_exact_string_first_seen() {
        let out = extract(&json!({
            "content": [
                {"type": "image_url", "image_url": "https://x/a.png"},
                {"type": "text", "text": "![again](https://x/a.png)"},
            ],
            "images": ["https://x/a.png"]
        }));
        assert_eq!(out.images, vec!["https://x/a.png"]);
    }

    // Scenario: one message mixing every part shape extracts each artifact
    // exactly once.
    #[test]
    fn mixed_shape_message_extracts_everything_once() {
        let out = extract(&json!({
            "content": [
                "lead-in",
                {"type": "text", "text": "body"},
                {"type": "image_url", "image_url": {"url": "https://x/a.png"}},
                {"inlineData": {"mimeType": "image/png", "data": "ZZZZ"}},
            ],
            "multi_mod_content": [
                {"type": "image", "b64_json": "ZZZZ"},
                {"type": "text", "text": "body"}
            ],
            "images": ["https://x/a.png"],
            "reasoning_content": "hmm"
        }));
        assert_eq!(out.text, "lead-in\nbody");
        assert_eq!(
            out.images,
            vec!["https://x/a.png", "data:image/png;base64,ZZZZ"]
        );
        assert_eq!(out.reasoning.as_deref(), Some("hmm"));
    }

    #[test]
    fn extraction_is_idempotent() {
        let first = extract(&json!({
            "content": "a caption with ![img](https://x/i.png)",
            "images": ["data:image/png;base64,QUJD"]
        }));

        let rebuilt = json!({
            "content": first.text,
            "images": first.images,
        });
        let second = extract(&rebuilt);

        assert_eq!(second.text, first.text);
        assert_eq!(second.images, first.images);
    }

    #[test]
    fn empty_message_yields_default() {
        assert_eq!(extract(&json!({})), Extracted::default());
        assert_eq!(extract(&json!({"content": null})), Extracted::default());
    }
}
