//! Server configuration.

use anyhow::Result;
use promptlib_core::{EngineConfig, ProviderConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Extra user-facing model ids, e.g. `fast = "openai/gpt-4o-mini"`.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

/// `[provider]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key. The key itself never lives in the file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./frontend/dist")
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("promptlib")
        .join("conversations.db")
}

fn default_model() -> String {
    "gemini-3-pro".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_timeout_secs(),
            chunk_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            db_path: default_db_path(),
            default_model: default_model(),
            temperature: default_temperature(),
            provider: ProviderSettings::default(),
            models: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        Ok(Config::default())
    }

    /// Engine settings. The API key is read from the configured environment variable.
    pub fn engine_config(&self) -> EngineConfig {
        let api_key = std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                target: "promptlib::startup",
                "{} is not set, provider requests will be unauthenticated",
                self.provider.api_key_env
            );
        }

        EngineConfig {
            db_path: self.db_path.clone(),
            provider: ProviderConfig {
                base_url: self.provider.base_url.clone(),
                api_key,
                request_timeout: Duration::from_secs(self.provider.request_timeout_secs),
                chunk_timeout: Duration::from_secs(self.provider.chunk_timeout_secs),
            },
            default_model: self.default_model.clone(),
            temperature: self.temperature,
            model_aliases: self.models.clone(),
        }
    }
}
