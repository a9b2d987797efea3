//! CLI configuration loader.
//!
//! An optional TOML file with a `[client]` table (endpoint, key, retries,
//! timeout) and a `[defaults]` table (models and sampling), then environment
//! overrides.

use mistral_llm::{ClientConfig, model};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "mistral.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_fim_model")]
    pub fim_model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            fim_model: default_fim_model(),
            embed_model: default_embed_model(),
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_chat_model() -> String {
    model::MISTRAL_SMALL_LATEST.to_string()
}

fn default_fim_model() -> String {
    model::CODESTRAL_LATEST.to_string()
}

fn default_embed_model() -> String {
    model::MISTRAL_EMBED.to_string()
}

impl AppConfig {
    /// Reads `path`, or `mistral.toml` in the working directory when present.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => Some(path),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        let mut cfg = match path {
            Some(path) => Self::read(&path).await?,
            None => {
                tracing::debug!("no config file found; using defaults");
                Self::default()
            }
        };

        cfg.apply_env_overrides(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    async fn read(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("MISTRAL_ENDPOINT") {
            self.client.endpoint = v;
        }
        if let Some(v) = non_empty("MISTRAL_MODEL") {
            self.defaults.model = v;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.client.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("client.endpoint is required"));
        }
        if self.defaults.model.trim().is_empty() {
            return Err(anyhow::anyhow!("defaults.model is required"));
        }
        if let Some(t) = self.defaults.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(anyhow::anyhow!(
                    "defaults.temperature must be within 0.0..=2.0, got {t}"
                ));
            }
        }
        if self.defaults.max_tokens == Some(0) {
            return Err(anyhow::anyhow!("defaults.max_tokens must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn loads_client_and_defaults_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mistral.toml");
        std::fs::write(
            &path,
            r#"
[client]
endpoint = "https://codestral.mistral.ai"
max_retries = 3
timeout_secs = 30

[defaults]
model = "mistral-large-latest"
temperature = 0.2
"#,
        )
        .unwrap();

        let cfg = AppConfig::read(&path).await.unwrap();
        assert_eq!(cfg.client.endpoint, "https://codestral.mistral.ai");
        assert_eq!(cfg.client.max_retries, 3);
        assert_eq!(cfg.client.timeout, Duration::from_secs(30));
        assert!(cfg.client.api_key.is_none());
        assert_eq!(cfg.defaults.model, "mistral-large-latest");
        assert_eq!(cfg.defaults.fim_model, "codestral-latest");
        assert_eq!(cfg.defaults.temperature, Some(0.2));
        cfg.validate().unwrap();
    }

    #[tokio::test]
    async fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(dir.path().join("absent.toml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read config"));
    }

    #[test]
    fn env_overrides_replace_non_empty_values() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|k| match k {
            "MISTRAL_ENDPOINT" => Some("http://localhost:8080".to_string()),
            "MISTRAL_MODEL" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.client.endpoint, "http://localhost:8080");
        assert_eq!(cfg.defaults.model, "mistral-small-latest");
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = AppConfig::default();
        cfg.defaults.temperature = Some(3.0);
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.defaults.max_tokens = Some(0);
        assert!(cfg.validate().is_err());

        AppConfig::default().validate().unwrap();
    }
}
