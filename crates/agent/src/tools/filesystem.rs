//! File tools confined to the workspace

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::ToolTrait;
use crate::dispatch::ToolOutput;

type ToolResult = Result<ToolOutput, Box<dyn std::error::Error + Send + Sync>>;

pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read the contents of a file in the workspace."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File path relative to the workspace" } },
            "required": ["path"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let args: PathArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("reading {:?}", path);
        if !path.is_file() {
            return Err(format!("no such file: {}", args.path).into());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(ToolOutput::Text(content))
    }
}

pub struct WriteToFileTool {
    workspace: PathBuf,
}

impl WriteToFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolTrait for WriteToFileTool {
    fn name(&self) -> &str {
        "write_to_file"
    }
    fn description(&self) -> &str {
        "Write content to a file in the workspace, replacing it if it exists. Parent directories are created."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path relative to the workspace" },
                "content": { "type": "string", "description": "Complete file content" }
            },
            "required": ["path", "content"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let args: WriteArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("writing {:?}", path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &args.content).await?;
        Ok(ToolOutput::Text(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}

pub struct ListFilesTool {
    workspace: PathBuf,
}

impl ListFilesTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl ToolTrait for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }
    fn description(&self) -> &str {
        "List the entries of a workspace directory. Directories end with '/'."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "Directory relative to the workspace" } },
            "required": ["path"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let args: PathArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("listing {:?}", path);
        if !path.is_dir() {
            return Err(format!("not a directory: {}", args.path).into());
        }
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            items.push(name);
        }
        items.sort();
        if items.is_empty() {
            Ok(ToolOutput::Text("(empty directory)".to_string()))
        } else {
            Ok(ToolOutput::Text(items.join("\n")))
        }
    }
}
