//! Configuration management for Ratchet
//!
//! Loads and saves provider credentials, engine limits and the workspace
//! location from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, workspace_path};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Model provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

/// Which tool-calling encoding to ask the model for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPreference {
    Xml,
    Native,
    /// Native when the provider supports function calling, xml otherwise
    #[default]
    Auto,
}

/// Turn loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_mistake_limit")]
    pub consecutive_mistake_limit: u32,
    #[serde(default = "default_api_request_timeout_ms")]
    pub api_request_timeout_ms: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default)]
    pub protocol: ProtocolPreference,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_param_bytes")]
    pub max_param_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consecutive_mistake_limit: default_mistake_limit(),
            api_request_timeout_ms: default_api_request_timeout_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            tool_timeout_ms: default_tool_timeout_ms(),
            protocol: ProtocolPreference::default(),
            max_message_bytes: default_max_message_bytes(),
            max_param_bytes: default_max_param_bytes(),
        }
    }
}

fn default_mistake_limit() -> u32 {
    3
}

fn default_api_request_timeout_ms() -> u64 {
    60_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

fn default_max_param_bytes() -> usize {
    100 * 1024
}

impl EngineConfig {
    pub fn api_request_timeout(&self) -> Duration {
        Duration::from_millis(self.api_request_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Reject limits the turn loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api_request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "api_request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.tool_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "tool_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_param_bytes > self.max_message_bytes {
            return Err(ConfigError::Invalid(format!(
                "max_param_bytes ({}) exceeds max_message_bytes ({})",
                self.max_param_bytes, self.max_message_bytes
            )));
        }
        Ok(())
    }
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            engine: EngineConfig::default(),
            workspace: default_workspace(),
        }
    }
}

fn default_workspace() -> String {
    "~/.ratchet/workspace".to_string()
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location, falling back to defaults when absent
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Resolved workspace directory
    pub fn workspace_path(&self) -> PathBuf {
        let path = &self.workspace;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        } else if path == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
        PathBuf::from(path)
    }

    pub fn api_key(&self) -> Option<String> {
        let key = self.provider.api_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }

    pub fn api_base(&self) -> Option<String> {
        self.provider
            .api_base
            .as_ref()
            .filter(|base| !base.is_empty())
            .cloned()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    pub fn default_model(&self) -> String {
        self.provider.model.clone()
    }
}

/// Write a default config and create the workspace
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("config written to {:?}", config_path);
    }

    let config = Config::load().await?;
    let workspace = config.workspace_path();
    tokio::fs::create_dir_all(&workspace).await?;
    info!("workspace ready at {:?}", workspace);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.consecutive_mistake_limit, 3);
        assert_eq!(engine.api_request_timeout_ms, 60_000);
        assert_eq!(engine.max_retry_attempts, 3);
        assert_eq!(engine.tool_timeout_ms, 30_000);
        assert_eq!(engine.protocol, ProtocolPreference::Auto);
        assert_eq!(engine.max_message_bytes, 1_048_576);
        assert_eq!(engine.max_param_bytes, 102_400);
        assert_eq!(engine.api_request_timeout(), Duration::from_secs(60));
        assert_eq!(engine.tool_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let engine = EngineConfig {
            api_request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(engine.validate(), Err(ConfigError::Invalid(_))));

        let engine = EngineConfig {
            tool_timeout_ms: 0,
            ..Default::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_param_ceiling_above_message_ceiling() {
        let engine = EngineConfig {
            max_message_bytes: 10,
            max_param_bytes: 20,
            ..Default::default()
        };
        let err = engine.validate().unwrap_err();
        assert!(err.to_string().contains("max_param_bytes"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"engine": {"max_retry_attempts": 7, "protocol": "xml"}}"#)
                .unwrap();
        assert_eq!(config.engine.max_retry_attempts, 7);
        assert_eq!(config.engine.protocol, ProtocolPreference::Xml);
        assert_eq!(config.engine.consecutive_mistake_limit, 3);
        assert_eq!(config.provider.model, "anthropic/claude-sonnet-4");
        assert_eq!(config.workspace, "~/.ratchet/workspace");
    }

    #[test]
    fn test_api_key_blank_is_none() {
        let mut config = Config::default();
        assert!(!config.has_api_key());
        config.provider.api_key = "   ".to_string();
        assert_eq!(config.api_key(), None);
        config.provider.api_key = "sk-or-1".to_string();
        assert_eq!(config.api_key(), Some("sk-or-1".to_string()));
    }

    #[test]
    fn test_api_base_empty_is_none() {
        let mut config = Config::default();
        config.provider.api_base = Some(String::new());
        assert_eq!(config.api_base(), None);
        config.provider.api_base = Some("http://localhost:1234/v1".to_string());
        assert_eq!(
            config.api_base(),
            Some("http://localhost:1234/v1".to_string())
        );
    }

    #[test]
    fn test_workspace_path_expands_tilde() {
        let config = Config {
            workspace: "~/ws".to_string(),
            ..Default::default()
        };
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.workspace_path(), home.join("ws"));
        }

        let config = Config {
            workspace: "/abs/ws".to_string(),
            ..Default::default()
        };
        assert_eq!(config.workspace_path(), PathBuf::from("/abs/ws"));
    }
}
