//! Static model catalog.
//!
//! Built once from config at startup and shared read-only across all
//! sessions. Credentials are resolved from the environment here, eagerly, so
//! `available` is fixed for the process lifetime and a caller can never be
//! routed to a provider without a configured key.

use crate::config::GatewayConfig;
use crate::credits::Credits;
use crate::error::{GatewayError, Result};
use crate::providers::{ProviderPreset, WireFormat};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable, process-lifetime description of one routable model.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub model_id: String,
    pub provider_id: String,
    pub wire_format: WireFormat,
    pub base_url: String,
    /// Model id sent upstream (catalog id unless remapped in config).
    pub upstream_model: String,
    pub input_price_per_ktok: Credits,
    pub output_price_per_ktok: Credits,
    /// Resolved at startup; `None` means no credential is configured.
    pub api_key: Option<String>,
}

impl ModelProfile {
    #[must_use]
    pub fn available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Total cost of a call under this model's pricing.
    #[must_use]
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Credits {
        Credits::token_cost(input_tokens, self.input_price_per_ktok)
            + Credits::token_cost(output_tokens, self.output_price_per_ktok)
    }
}

pub struct ProviderRegistry {
    profiles: HashMap<String, Arc<ModelProfile>>,
}

impl ProviderRegistry {
    /// Resolve every model in config against its provider section or preset.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut profiles = HashMap::new();

        for (model_id, model_cfg) in &config.models {
            let provider_cfg = config.providers.get(&model_cfg.provider);
            let preset = ProviderPreset::from_name(&model_cfg.provider);

            let base_url = provider_cfg
                .and_then(|p| p.base_url.clone())
                .or_else(|| preset.map(|p| p.base_url.to_string()))
                .ok_or_else(|| {
                    GatewayError::config(format!(
                        "Provider '{}' has no base_url and no preset",
                        model_cfg.provider
                    ))
                })?;

            let format_name = provider_cfg.and_then(|p| p.format.clone());
            let wire_format = match format_name {
                Some(name) => WireFormat::from_name(&name).ok_or_else(|| {
                    GatewayError::config(format!(
                        "Provider '{}' has unknown wire format '{}'",
                        model_cfg.provider, name
                    ))
                })?,
                None => preset.map(|p| p.format).ok_or_else(|| {
                    GatewayError::config(format!(
                        "Provider '{}' has no wire format and no preset",
                        model_cfg.provider
                    ))
                })?,
            };

            let api_key_env = provider_cfg
                .and_then(|p| p.api_key_env.clone())
                .or_else(|| preset.map(|p| p.default_api_key_env.to_string()));
            let api_key = api_key_env
                .as_deref()
                .and_then(|env| std::env::var(env).ok())
                .filter(|key| !key.is_empty());

            if api_key.is_none() {
                tracing::warn!(
                    model = %model_id,
                    provider = %model_cfg.provider,
                    "No API key configured; model will be listed as unavailable"
                );
            }

            profiles.insert(
                model_id.clone(),
                Arc::new(ModelProfile {
                    model_id: model_id.clone(),
                    provider_id: model_cfg.provider.clone(),
                    wire_format,
                    base_url,
                    upstream_model: model_cfg
                        .upstream_model
                        .clone()
                        .unwrap_or_else(|| model_id.clone()),
                    input_price_per_ktok: model_cfg.input_price,
                    output_price_per_ktok: model_cfg.output_price,
                    api_key,
                }),
            );
        }

        Ok(Self { profiles })
    }

    /// Constant-time catalog lookup. No network access.
    #[must_use]
    pub fn resolve(&self, model_id: &str) -> Option<Arc<ModelProfile>> {
        self.profiles.get(model_id).cloned()
    }

    /// All profiles ordered by provider then model name. Informational
    /// listing only; nothing else depends on this order.
    #[must_use]
    pub fn list_models(&self) -> Vec<Arc<ModelProfile>> {
        let mut profiles: Vec<_> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| {
            (a.provider_id.as_str(), a.model_id.as_str())
                .cmp(&(b.provider_id.as_str(), b.model_id.as_str()))
        });
        profiles
    }
}
