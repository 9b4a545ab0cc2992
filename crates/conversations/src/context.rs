//! Context builder.
//!
//! Renders stored history plus the current input into an ordered list of
//! provider-agnostic [`Turn`]s: optional system preamble, optional search
//! context, the trailing history window, then the current user turn.
//!
//! Callers pass history that does NOT include the current input. On a
//! regenerate the stored history arrives in full — superseded reply
//! included — and the retried input simply becomes the current turn again.

use mm_domain::config::HistoryConfig;
use mm_domain::message::{Message, Role, Turn, TurnPart, TurnRole};

/// Assemble the full provider context for one generation request.
pub fn build_context(
    cfg: &HistoryConfig,
    history: &[Message],
    input_text: &str,
    input_images: &[String],
    search_context: Option<&str>,
) -> Vec<Turn> {
    let mut turns = Vec::new();

    if let Some(prompt) = cfg.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
        turns.push(Turn::text(TurnRole::System, prompt));
    }
    if let Some(context) = search_context.filter(|c| !c.trim().is_empty()) {
        turns.push(Turn::text(TurnRole::System, context));
    }

    // Trailing window. Function messages are tool bookkeeping and never
    // reach providers.
    let window: Vec<&Message> = history
        .iter()
        .filter(|m| m.role != Role::Function)
        .collect();
    let skip = window.len().saturating_sub(cfg.max_messages);
    for message in &window[skip..] {
        let role = match message.role {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Assistant,
            Role::System => TurnRole::System,
            Role::Function => continue,
        };
        let mut parts = vec![TurnPart::Text {
            text: message.content.clone(),
        }];
        if let Some(images) = &message.images {
            parts.extend(images.iter().map(|url| image_part(url)));
        }
        turns.push(Turn { role, parts });
    }

    // Current input, with image carry-forward when the turn has none of
    // its own.
    let mut parts = vec![TurnPart::Text {
        text: input_text.to_owned(),
    }];
    if !input_images.is_empty() {
        parts.extend(input_images.iter().map(|url| image_part(url)));
    } else if cfg.carry_forward_images {
        if let Some(images) = last_assistant_images(history) {
            parts.extend(images.iter().map(|url| image_part(url)));
        }
    }
    turns.push(Turn {
        role: TurnRole::User,
        parts,
    });

    turns
}

/// Images from the most recent assistant message that carries any.
fn last_assistant_images(history: &[Message]) -> Option<&Vec<String>> {
    history
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| m.images.as_ref().filter(|imgs| !imgs.is_empty()))
}

/// Classify a stored image reference: data URLs become inline base64 parts,
/// anything else is passed through as a plain URL.
fn image_part(url: &str) -> TurnPart {
    match parse_data_url(url) {
        Some((mime, data)) => TurnPart::InlineImage {
            mime: mime.to_owned(),
            data: data.to_owned(),
        },
        None => TurnPart::ImageUrl {
            url: url.to_owned(),
        },
    }
}

/// Split `data:<mime>;base64,<data>` into its mime type and payload.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    if mime.is_empty() || data.is_empty() {
        return None;
    }
    Some((mime, data))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mm_domain::message::Message;

    fn cfg() -> HistoryConfig {
        HistoryConfig {
            max_messages: 30,
            carry_forward_images: true,
            system_prompt: None,
        }
    }

    #[test]
    fn minimal_context_is_just_the_input_turn() {
        let turns = build_context(&cfg(), &[], "hello", &[], None);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].text_content(), "hello");
    }

    #[test]
    fn system_prompt_then_search_context_lead() {
        let config = HistoryConfig {
            system_prompt: Some("be terse".into()),
            ..cfg()
        };
        let turns = build_context(&config, &[], "q", &[], Some("Search results:\n- a"));
        assert_eq!(turns[0].role, TurnRole::System);
        assert_eq!(turns[0].text_content(), "be terse");
        assert_eq!(turns[1].role, TurnRole::System);
        assert!(turns[1].text_content().starts_with("Search results:"));
        assert_eq!(turns[2].role, TurnRole::User);
    }

    #[test]
    fn history_window_keeps_only_the_tail() {
        let config = HistoryConfig {
            max_messages: 2,
            ..cfg()
        };
        let history = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ];
        let turns = build_context(&config, &history, "four", &[], None);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].text_content(), "two");
        assert_eq!(turns[1].text_content(), "three");
        assert_eq!(turns[2].text_content(), "four");
    }

    #[test]
    fn function_messages_are_dropped() {
        let mut tool_msg = Message::user("tool output");
        tool_msg.role = Role::Function;
        let history = vec![Message::user("hi"), tool_msg, Message::assistant("ok")];

        let turns = build_context(&cfg(), &history, "next", &[], None);
        assert_eq!(turns.len(), 3);
        assert!(turns.iter().all(|t| !t.text_content().contains("tool output")));
    }

    #[test]
    fn input_images_are_classified_by_scheme() {
        let images = vec![
            "https://cdn.example.com/cat.png".to_string(),
            "data:image/jpeg;base64,AAAA".to_string(),
        ];
        let turns = build_context(&cfg(), &[], "look", &images, None);

        let parts = &turns[0].parts;
        assert!(matches!(
            &parts[1],
            TurnPart::ImageUrl { url } if url.ends_with("cat.png")
        ));
        assert!(matches!(
            &parts[2],
            TurnPart::InlineImage { mime, data } if mime == "image/jpeg" && data == "AAAA"
        ));
    }

    #[test]
    fn carries_forward_latest_assistant_images() {
        let history = vec![
            Message::user("draw a cat"),
            Message::assistant("here").with_images(vec!["https://x/old.png".into()]),
            Message::user("nice"),
            Message::assistant("thanks").with_images(vec!["https://x/new.png".into()]),
        ];

        let turns = build_context(&cfg(), &history, "make it blue", &[], None);
        let last = turns.last().unwrap();
        assert!(last
            .parts
            .iter()
            .any(|p| matches!(p, TurnPart::ImageUrl { url } if url.ends_with("new.png"))));
        assert!(!last
            .parts
            .iter()
            .any(|p| matches!(p, TurnPart::ImageUrl { url } if url.ends_with("old.png"))));
    }

    #[test]
    fn no_carry_forward_when_input_has_images() {
        let history =
            vec![Message::assistant("here").with_images(vec!["https://x/old.png".into()])];
        let mine = vec!["https://x/mine.png".to_string()];

        let turns = build_context(&cfg(), &history, "edit this", &mine, None);
        let last = turns.last().unwrap();
        assert!(!last
            .parts
            .iter()
            .any(|p| matches!(p, TurnPart::ImageUrl { url } if url.ends_with("old.png"))));
    }

    #[test]
    fn no_carry_forward_when_disabled() {
        let config = HistoryConfig {
            carry_forward_images: false,
            ..cfg()
        };
        let history =
            vec![Message::assistant("here").with_images(vec!["https://x/old.png".into()])];

        let turns = build_context(&config, &history, "again", &[], None);
        assert_eq!(turns.last().unwrap().parts.len(), 1);
    }

    // A regenerate passes the stored history through in full, so the
    // superseded reply stays visible and the retried input closes the
    // context as the current turn.
    #[test]
    fn regenerate_keeps_superseded_reply_in_context() {
        let history = vec![Message::user("a"), Message::assistant("b")];

        let turns = build_context(&cfg(), &history, "a", &[], None);
        let texts: Vec<String> = turns.iter().map(|t| t.text_content()).collect();
        assert_eq!(texts, vec!["a", "b", "a"]);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].role, TurnRole::User);
    }
}
