//! Conversation store.
//!
//! Persists all conversations in `conversations.json` under the configured
//! data directory. Every read/write goes through an in-memory map guarded
//! by a `RwLock`; [`ConversationStore::flush`] writes the map back to disk.
//! Ownership is enforced here: lookups and appends against a conversation
//! owned by someone else behave exactly like lookups against a missing
//! conversation, so the API never leaks which ids exist.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use mm_domain::error::{Error, Result};
use mm_domain::message::{Conversation, Message};

/// New conversations take their title from the first input, truncated.
const TITLE_MAX_CHARS: usize = 30;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed conversation store, keyed by conversation id.
pub struct ConversationStore {
    conversations_path: PathBuf,
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl ConversationStore {
    /// Load or create the store at `data_dir/conversations.json`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(Error::Io)?;

        let conversations_path = data_dir.join("conversations.json");
        let conversations: HashMap<String, Conversation> = if conversations_path.exists() {
            let raw = std::fs::read_to_string(&conversations_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            conversations = conversations.len(),
            path = %conversations_path.display(),
            "conversation store loaded"
        );

        Ok(Self {
            conversations_path,
            conversations: RwLock::new(conversations),
        })
    }

    /// Create a new conversation for `owner_id`, titled from the first input.
    pub fn create(&self, owner_id: &str, model: &str, first_input: &str) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_owned(),
            title: title_from_input(first_input),
            model: model.to_owned(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut conversations = self.conversations.write();
        conversations.insert(conversation.id.clone(), conversation.clone());
        conversation
    }

    /// Look up a conversation by id, scoped to its owner.
    pub fn get(&self, conversation_id: &str, owner_id: &str) -> Option<Conversation> {
        let conversations = self.conversations.read();
        conversations
            .get(conversation_id)
            .filter(|c| c.owner_id == owner_id)
            .cloned()
    }

    /// Return a conversation's messages, scoped to its owner.
    ///
    /// `None` means missing or foreign; callers cannot tell which.
    pub fn find_messages(&self, conversation_id: &str, owner_id: &str) -> Option<Vec<Message>> {
        let conversations = self.conversations.read();
        conversations
            .get(conversation_id)
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.messages.clone())
    }

    /// Append a message to a conversation and bump `updated_at`.
    ///
    /// Empty `images`/`videos` lists are normalized to `None` before the
    /// message is stored. Returns `false` (a silent no-op) when the
    /// conversation is missing or owned by someone else.
    pub fn append_message(
        &self,
        conversation_id: &str,
        owner_id: &str,
        mut message: Message,
    ) -> bool {
        if matches!(&message.images, Some(imgs) if imgs.is_empty()) {
            message.images = None;
        }
        if matches!(&message.videos, Some(vids) if vids.is_empty()) {
            message.videos = None;
        }

        let mut conversations = self.conversations.write();
        match conversations
            .get_mut(conversation_id)
            .filter(|c| c.owner_id == owner_id)
        {
            Some(conversation) => {
                conversation.messages.push(message);
                conversation.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// List a user's conversations, most recently updated first.
    pub fn list(&self, owner_id: &str) -> Vec<Conversation> {
        let conversations = self.conversations.read();
        let mut owned: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        owned
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let conversations = self.conversations.read();
        let json = serde_json::to_string_pretty(&*conversations)
            .map_err(|e| Error::Other(format!("serializing conversations: {e}")))?;
        std::fs::write(&self.conversations_path, json).map_err(Error::Io)?;
        Ok(())
    }

    /// Flush on a blocking thread so stream handlers never stall on disk IO.
    pub async fn flush_async(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || store.flush()).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "conversation flush failed"),
            Err(e) => tracing::warn!(error = %e, "conversation flush task panicked"),
        }
    }
}

fn title_from_input(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "New conversation".to_owned();
    }
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
