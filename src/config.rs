//! Configuration loading.
//!
//! Settings come from a TOML file (default `deploybot.toml` in the working
//! directory). The bot token may instead be supplied via the
//! `TELEGRAM_BOT_TOKEN` environment variable so the file never has to hold
//! the credential.

use anyhow::Context as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot API token. Falls back to `TELEGRAM_BOT_TOKEN` when unset.
    #[serde(default)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    /// Base URL of the management API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout. Bounds every remote call; there is no retry.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path of the redb file holding credentials and resource mappings.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_base_url() -> String {
    "https://api.render.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_store_path() -> PathBuf {
    PathBuf::from("deploybot.redb")
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Config {
    /// Load configuration from the given path, or fall back to defaults when
    /// no path is given and `deploybot.toml` does not exist.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let default_path = Path::new("deploybot.toml");
        let path = match path {
            Some(explicit) => explicit,
            None if default_path.exists() => default_path,
            None => {
                return Ok(Self::parse("")?);
            }
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::parse(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Resolve the bot token from config or environment.
    pub fn bot_token(&self) -> crate::Result<String> {
        if let Some(token) = &self.telegram.bot_token
            && !token.is_empty()
        {
            return Ok(token.clone());
        }
        std::env::var("TELEGRAM_BOT_TOKEN")
            .context("no bot token: set telegram.bot_token in the config or TELEGRAM_BOT_TOKEN")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").expect("empty config should parse");
        assert_eq!(config.render.base_url, "https://api.render.com/v1");
        assert_eq!(config.render.timeout_secs, 30);
        assert_eq!(config.store.path, PathBuf::from("deploybot.redb"));
        assert!(config.telegram.bot_token.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let raw = r#"
            [telegram]
            bot_token = "123:abc"

            [render]
            base_url = "http://localhost:9999/v1"
            timeout_secs = 5

            [store]
            path = "/tmp/state.redb"
        "#;
        let config = Config::parse(raw).expect("config should parse");
        assert_eq!(config.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.render.base_url, "http://localhost:9999/v1");
        assert_eq!(config.render.timeout_secs, 5);
        assert_eq!(config.store.path, PathBuf::from("/tmp/state.redb"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = "[render]\nbase_uri = \"typo\"\n";
        assert!(Config::parse(raw).is_err());
    }
}
