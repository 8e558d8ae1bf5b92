//! Workspace confinement for file tools

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathValidationError {
    #[error("path {path} is outside workspace {workspace}")]
    OutsideWorkspace { path: String, workspace: String },

    #[error("cannot resolve path {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve `path` against `workspace_root` and refuse anything that lands
/// outside it.
///
/// Relative paths are joined to the workspace, `~/` expands to the home
/// directory. `.` and `..` are folded lexically, then the deepest existing
/// ancestor is canonicalized so symlinks cannot escape. The target itself
/// does not need to exist.
pub async fn validate_workspace_path(
    path: &str,
    workspace_root: &Path,
) -> Result<PathBuf, PathValidationError> {
    let joined = if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| workspace_root.join(rest))
    } else if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        workspace_root.join(path)
    };

    let resolved = resolve_existing_prefix(&normalize(&joined)).await.map_err(|source| {
        PathValidationError::Io {
            path: path.to_string(),
            source,
        }
    })?;
    let workspace = resolve_existing_prefix(&normalize(workspace_root))
        .await
        .map_err(|source| PathValidationError::Io {
            path: workspace_root.display().to_string(),
            source,
        })?;

    if !resolved.starts_with(&workspace) {
        return Err(PathValidationError::OutsideWorkspace {
            path: path.to_string(),
            workspace: workspace.display().to_string(),
        });
    }
    Ok(resolved)
}

/// Fold `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix and re-attach the rest
async fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Ok(path.to_path_buf()),
        }
    }

    let mut resolved = tokio::fs::canonicalize(&existing).await?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
