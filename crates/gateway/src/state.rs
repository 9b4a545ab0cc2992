use std::sync::Arc;

use mm_conversations::ConversationStore;
use mm_domain::config::Config;
use mm_providers::registry::ProviderRegistry;

use crate::search::SearchClient;

/// One entry of the startup-computed bearer-token table.
///
/// Tokens are read from env vars once at startup and only their SHA-256
/// digests are kept in memory.
#[derive(Clone)]
pub struct TokenEntry {
    pub token_hash: Vec<u8>,
    pub owner_id: String,
}

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ConversationStore>,
    pub registry: Arc<ProviderRegistry>,
    pub search: Arc<SearchClient>,
    /// Bearer-token table. Empty = dev mode (requests authenticate as
    /// `owner_id = "dev"`).
    pub tokens: Arc<Vec<TokenEntry>>,
}
