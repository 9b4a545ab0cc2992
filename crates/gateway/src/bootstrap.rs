//! Startup wiring: stores, provider registry, search client, auth table.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use mm_conversations::ConversationStore;
use mm_domain::config::{AuthUsersConfig, Config};
use mm_providers::registry::ProviderRegistry;

use crate::search::SearchClient;
use crate::state::{AppState, TokenEntry};

/// Build the shared [`AppState`] from the loaded configuration.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let store = ConversationStore::new(&config.storage.data_dir)
        .with_context(|| format!("opening store in {}", config.storage.data_dir.display()))?;

    let registry = ProviderRegistry::from_config(&config);
    if registry.is_empty() {
        tracing::warn!("no providers initialized; /v1/generate will reject every model");
    }

    let search = SearchClient::from_config(&config.search);
    let tokens = build_token_table(&config.auth);

    Ok(AppState {
        config,
        store: Arc::new(store),
        registry: Arc::new(registry),
        search: Arc::new(search),
        tokens: Arc::new(tokens),
    })
}

/// Read each configured user token from its env var and keep only the
/// SHA-256 digest. Entries whose env var is unset are skipped with a
/// warning; an empty result means dev mode.
pub fn build_token_table(auth: &AuthUsersConfig) -> Vec<TokenEntry> {
    let mut table = Vec::new();
    for user in &auth.users {
        match std::env::var(&user.token_env) {
            Ok(token) if !token.is_empty() => table.push(TokenEntry {
                token_hash: Sha256::digest(token.as_bytes()).to_vec(),
                owner_id: user.id.clone(),
            }),
            _ => tracing::warn!(
                user = %user.id,
                env = %user.token_env,
                "token env var unset or empty, user cannot authenticate"
            ),
        }
    }

    if table.is_empty() {
        tracing::warn!("no user tokens loaded — dev mode, all requests run as \"dev\"");
    }
    table
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mm_domain::config::UserTokenConfig;

    #[test]
    fn token_table_hashes_and_skips_unset() {
        // Process-wide env var, unique to this test.
        std::env::set_var("MM_TEST_TOKEN_ALICE", "s3cret");
        let auth = AuthUsersConfig {
            users: vec![
                UserTokenConfig {
                    id: "alice".into(),
                    token_env: "MM_TEST_TOKEN_ALICE".into(),
                },
                UserTokenConfig {
                    id: "bob".into(),
                    token_env: "MM_TEST_TOKEN_MISSING".into(),
                },
            ],
        };

        let table = build_token_table(&auth);
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].owner_id, "alice");
        assert_eq!(
            table[0].token_hash,
            Sha256::digest(b"s3cret").to_vec()
        );
        std::env::remove_var("MM_TEST_TOKEN_ALICE");
    }
}
