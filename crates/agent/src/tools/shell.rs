//! Shell command tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::ToolTrait;
use crate::dispatch::ToolOutput;

const MAX_OUTPUT_BYTES: usize = 10_000;

/// Runs `sh -c` in the workspace or a directory inside it
pub struct ExecuteCommandTool {
    workspace: PathBuf,
    timeout: Duration,
}

impl ExecuteCommandTool {
    pub fn new(workspace: PathBuf, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
    cwd: Option<String>,
}

#[async_trait]
impl ToolTrait for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }
    fn description(&self) -> &str {
        "Run a shell command. Output is stdout, then stderr, then the exit code if non-zero."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line passed to sh -c" },
                "cwd": { "type": "string", "description": "Optional working directory inside the workspace" }
            },
            "required": ["command"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Box<dyn std::error::Error + Send + Sync>> {
        let args: CommandArgs = serde_json::from_value(args)?;

        let cwd = match args.cwd.as_deref().filter(|dir| !dir.is_empty()) {
            Some(dir) => validate_workspace_path(dir, &self.workspace).await?,
            None => self.workspace.clone(),
        };

        debug!("executing in {:?}: {}", cwd, args.command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(format!("command timed out after {:?}", self.timeout).into());
            }
        };

        let mut parts = Vec::new();
        if !output.stdout.is_empty() {
            parts.push(String::from_utf8_lossy(&output.stdout).to_string());
        }
        if !output.stderr.is_empty() {
            parts.push(format!(
                "stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        if !output.status.success() {
            match output.status.code() {
                Some(code) => parts.push(format!("exit code: {}", code)),
                None => parts.push("terminated by signal".to_string()),
            }
        }

        let text = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        Ok(ToolOutput::Text(truncate(text)))
    }
}

fn truncate(text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... output truncated, {} more bytes",
        &text[..cut],
        text.len() - cut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "é".repeat(MAX_OUTPUT_BYTES);
        let out = truncate(text);
        assert!(out.contains("output truncated"));
        assert!(out.len() < MAX_OUTPUT_BYTES + 64);
    }

    #[test]
    fn test_short_output_untouched() {
        assert_eq!(truncate("ok".to_string()), "ok");
    }
}
