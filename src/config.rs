use crate::credits::Credits;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Head-room multiplier for admission control (clamped to >= 2).
    #[serde(default = "default_safety_factor")]
    pub safety_factor: u32,
    /// Balance granted to a caller on first authenticated contact.
    #[serde(default)]
    pub initial_credits: Credits,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

/// One upstream provider. Every field is optional when the provider name
/// matches a built-in preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// "openai" or "anthropic".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    /// Credits per 1000 input tokens.
    pub input_price: Credits,
    /// Credits per 1000 output tokens.
    pub output_price: Credits,
    /// Model id to send upstream when it differs from the catalog id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_model: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_safety_factor() -> u32 {
    2
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(GatewayError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    fn check(&self) -> Result<()> {
        for (model_id, model) in &self.models {
            if !self.providers.contains_key(&model.provider)
                && crate::providers::ProviderPreset::from_name(&model.provider).is_none()
            {
                return Err(GatewayError::config(format!(
                    "Model '{}' references unknown provider '{}'",
                    model_id, model.provider
                )));
            }
        }
        Ok(())
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("llm-gateway.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("llm-gateway")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("llm-gateway").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("llm-gateway").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".llm-gateway.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000
initial_credits = 25.0

[providers.deepseek]
api_key_env = "DEEPSEEK_API_KEY"

[models."deepseek-chat"]
provider = "deepseek"
input_price = 0.001
output_price = 0.002
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.safety_factor, 2);
        assert_eq!(config.initial_credits, Credits::from_f64(25.0));
        let model = config.models.get("deepseek-chat").unwrap();
        assert_eq!(model.provider, "deepseek");
        assert_eq!(model.input_price, Credits::from_f64(0.001));
    }

    #[test]
    fn test_model_with_unknown_provider_rejected() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[models."ghost-model"]
provider = "nonexistent"
input_price = 0.001
output_price = 0.002
"#
        )
        .unwrap();

        let err = GatewayConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[test]
    fn test_preset_provider_needs_no_section() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[models."gpt-4o"]
provider = "openai"
input_price = 0.005
output_price = 0.015
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert!(config.models.contains_key("gpt-4o"));
        assert!(config.providers.is_empty());
    }
}
