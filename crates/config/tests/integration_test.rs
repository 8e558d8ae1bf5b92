//! Integration tests for ratchet-config
//!
//! These tests verify the complete workflow of configuration management.

use ratchet_config::{paths::ensure_dir, Config, ProtocolPreference};
use tempfile::TempDir;

#[tokio::test]
async fn test_full_config_workflow() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("workflow_config.json");

    let mut config = Config::default();
    config.provider.api_key = "sk-or-workflow".to_string();
    config.engine.protocol = ProtocolPreference::Native;
    config.save_to(&config_path).await.expect("Failed to save");

    let mut loaded = Config::load_from(&config_path)
        .await
        .expect("Failed to load");
    assert_eq!(loaded.engine.protocol, ProtocolPreference::Native);

    loaded.engine.tool_timeout_ms = 5_000;
    loaded.provider.model = "openai/gpt-4o-mini".to_string();
    loaded.save_to(&config_path).await.expect("Failed to resave");

    let reloaded = Config::load_from(&config_path)
        .await
        .expect("Failed to reload");
    assert_eq!(reloaded.engine.tool_timeout_ms, 5_000);
    assert_eq!(reloaded.default_model(), "openai/gpt-4o-mini");
    assert_eq!(reloaded.api_key(), Some("sk-or-workflow".to_string()));
}

#[tokio::test]
async fn test_hand_edited_file_keeps_unlisted_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.json");
    let json = r#"{
        "provider": { "api_key": "sk-hand" },
        "engine": { "consecutive_mistake_limit": 1 }
    }"#;
    tokio::fs::write(&config_path, json).await.unwrap();

    let config = Config::load_from(&config_path).await.unwrap();
    assert_eq!(config.engine.consecutive_mistake_limit, 1);
    assert_eq!(config.engine.max_retry_attempts, 3);
    assert_eq!(config.engine.max_message_bytes, 1024 * 1024);
    assert_eq!(config.provider.model, "anthropic/claude-sonnet-4");
}

#[tokio::test]
async fn test_ensure_dir_creates_workspace() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let workspace = temp_dir.path().join("a").join("b").join("workspace");

    ensure_dir(&workspace).await.expect("Failed to create dir");
    assert!(workspace.is_dir());

    // second call is a no-op
    ensure_dir(&workspace).await.expect("Failed on existing dir");
}

#[test]
fn test_default_paths_live_under_data_dir() {
    let data = ratchet_config::data_dir();
    assert!(data.ends_with(".ratchet"));
    assert_eq!(ratchet_config::config_path(), data.join("config.json"));
    assert_eq!(ratchet_config::workspace_path(), data.join("workspace"));
}
