//! Common test utilities for Ratchet integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated HOME with its own config directory and workspace
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_dir = temp_dir.path().join(".ratchet");
        let workspace_dir = temp_dir.path().join("workspace");

        std::fs::create_dir_all(&config_dir)?;

        Ok(Self {
            temp_dir,
            config_dir,
            workspace_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn workspace_file(&self, name: &str) -> PathBuf {
        self.workspace_dir.join(name)
    }

    /// Command with HOME pointed at the test environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ratchet"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Config talking xml to `api_base` with the given retry budget
    pub fn create_config(&self, api_base: &str, max_retry_attempts: u32) -> anyhow::Result<()> {
        let config = serde_json::json!({
            "provider": {
                "api_key": "sk-test",
                "api_base": api_base,
                "model": "test/model"
            },
            "engine": {
                "protocol": "xml",
                "max_retry_attempts": max_retry_attempts,
                "api_request_timeout_ms": 5000
            },
            "workspace": self.workspace_dir.to_string_lossy()
        });
        std::fs::write(self.config_file(), serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }
}

/// SSE body streaming `text` as content deltas of at most `chunk` chars
pub fn sse_body(text: &str, chunk: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut body = String::new();
    for piece in chars.chunks(chunk) {
        let content: String = piece.iter().collect();
        let frame = serde_json::json!({"choices": [{"delta": {"content": content}}]});
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}
