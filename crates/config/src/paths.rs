//! Path utilities

use std::path::{Path, PathBuf};

/// Data directory (~/.ratchet)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ratchet")
}

/// Config file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Default workspace location
pub fn workspace_path() -> PathBuf {
    data_dir().join("workspace")
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
