//! Tests for Config serialization, deserialization, and core functionality

use ratchet_config::{Config, EngineConfig, ProtocolPreference, ProviderConfig};
use tempfile::TempDir;

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert_eq!(config.workspace, "~/.ratchet/workspace");

    assert!(config.provider.api_key.is_empty());
    assert!(config.provider.api_base.is_none());
    assert_eq!(config.provider.model, "anthropic/claude-sonnet-4");
    assert_eq!(config.provider.max_tokens, 8192);
    assert_eq!(config.provider.temperature, 0.7);

    assert_eq!(config.engine.consecutive_mistake_limit, 3);
    assert_eq!(config.engine.max_retry_attempts, 3);
    assert_eq!(config.engine.protocol, ProtocolPreference::Auto);
}

#[test]
fn test_protocol_preference_serde() {
    assert_eq!(
        serde_json::to_string(&ProtocolPreference::Native).unwrap(),
        "\"native\""
    );
    let parsed: ProtocolPreference = serde_json::from_str("\"auto\"").unwrap();
    assert_eq!(parsed, ProtocolPreference::Auto);
    assert!(serde_json::from_str::<ProtocolPreference>("\"grpc\"").is_err());
}

#[test]
fn test_empty_object_is_default() {
    let config: Config = serde_json::from_str("{}").unwrap();
    let default = Config::default();
    assert_eq!(config.workspace, default.workspace);
    assert_eq!(
        config.engine.api_request_timeout_ms,
        default.engine.api_request_timeout_ms
    );
    assert_eq!(config.provider.model, default.provider.model);
}

#[test]
fn test_api_base_omitted_when_none() {
    let json = serde_json::to_string(&ProviderConfig::default()).unwrap();
    assert!(!json.contains("api_base"));
}

#[tokio::test]
async fn test_save_and_load_roundtrip() {
    let temp_dir = temp_dir();
    let path = temp_dir.path().join("nested").join("config.json");

    let config = Config {
        provider: ProviderConfig {
            api_key: "sk-or-test".to_string(),
            api_base: Some("http://localhost:8080/v1".to_string()),
            model: "openai/gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
        },
        engine: EngineConfig {
            consecutive_mistake_limit: 5,
            max_retry_attempts: 1,
            protocol: ProtocolPreference::Xml,
            ..Default::default()
        },
        workspace: temp_dir.path().join("ws").to_string_lossy().to_string(),
    };

    config.save_to(&path).await.expect("Failed to save");
    assert!(path.exists());

    let loaded = Config::load_from(&path).await.expect("Failed to load");
    assert_eq!(loaded.api_key(), Some("sk-or-test".to_string()));
    assert_eq!(
        loaded.api_base(),
        Some("http://localhost:8080/v1".to_string())
    );
    assert_eq!(loaded.default_model(), "openai/gpt-4o");
    assert_eq!(loaded.engine.consecutive_mistake_limit, 5);
    assert_eq!(loaded.engine.max_retry_attempts, 1);
    assert_eq!(loaded.engine.protocol, ProtocolPreference::Xml);
    assert_eq!(loaded.workspace_path(), temp_dir.path().join("ws"));
}

#[tokio::test]
async fn test_load_missing_returns_defaults() {
    let temp_dir = temp_dir();
    let path = temp_dir.path().join("absent.json");

    let config = Config::load_from(&path).await.expect("defaults expected");
    assert!(!config.has_api_key());
    assert!(!path.exists());
}
