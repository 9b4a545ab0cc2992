//! Provider registry.
//!
//! Constructs and holds all configured provider adapters. At startup the
//! registry reads the [`Config`], resolves authentication (env vars, direct
//! keys, keychain), and instantiates the appropriate adapter family for
//! each configured provider. A model index maps every served model id to
//! its provider.

use std::collections::HashMap;
use std::sync::Arc;

use crate::delta_chat::DeltaChatProvider;
use crate::native_sse::NativeSseProvider;
use crate::traits::ProviderAdapter;
use crate::video_task::VideoTaskProvider;
use mm_domain::config::{Config, ProviderKind};
use mm_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all instantiated provider adapters plus the model index.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    /// model id → provider id
    models: HashMap<String, String>,
    default_model: Option<String>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`Config`].
    ///
    /// Providers that fail to initialize (usually missing credentials) are
    /// logged and skipped rather than aborting the entire startup.
    pub fn from_config(config: &Config) -> Self {
        let mut providers: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut models: HashMap<String, String> = HashMap::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn ProviderAdapter>> = match pc.kind {
                ProviderKind::DeltaChat => DeltaChatProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn ProviderAdapter>),
                ProviderKind::NativeSse => NativeSseProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn ProviderAdapter>),
                ProviderKind::VideoTask => VideoTaskProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn ProviderAdapter>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        models = pc.models.len(),
                        "registered provider"
                    );
                    for model in &pc.models {
                        if let Some(previous) = models.insert(model.clone(), pc.id.clone()) {
                            tracing::warn!(
                                model = %model,
                                previous = %previous,
                                now = %pc.id,
                                "model served by multiple providers, last wins"
                            );
                        }
                    }
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize provider, skipping"
                    );
                }
            }
        }

        if providers.is_empty() && !config.providers.is_empty() {
            tracing::warn!(
                "no providers initialized; generation requests will fail \
                 until auth is configured"
            );
        }

        Self {
            providers,
            models,
            default_model: config.default_model.clone(),
        }
    }

    /// Resolve a requested model to `(model_id, adapter)`.
    ///
    /// `None` falls back to the configured default model. Unknown models
    /// are a request error (the client named it) rather than a 404.
    pub fn resolve(&self, model: Option<&str>) -> Result<(String, Arc<dyn ProviderAdapter>)> {
        let model = match model {
            Some(m) => m.to_string(),
            None => self
                .default_model
                .clone()
                .ok_or_else(|| Error::Request("no model given and no default_model configured".into()))?,
        };

        let provider_id = self
            .models
            .get(&model)
            .ok_or_else(|| Error::Request(format!("unknown model: {model}")))?;
        let adapter = self
            .providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("provider {provider_id} not initialized")))?;

        Ok((model, adapter))
    }

    /// List all served model ids (sorted).
    pub fn list_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of initialized providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
