//! Tool registry and built-in tools

pub mod completion;
pub mod filesystem;
pub mod path_utils;
pub mod shell;

pub use completion::{AttemptCompletionTool, COMPLETION_TOOL};
pub use filesystem::{ListFilesTool, ReadFileTool, WriteToFileTool};
pub use shell::ExecuteCommandTool;

use async_trait::async_trait;
use ratchet_provider::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::ToolOutput;

pub type SharedTool = Arc<dyn ToolTrait>;

#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments; property names double as xml tags
    fn parameters(&self) -> Value;
    async fn execute(
        &self,
        args: Value,
    ) -> Result<ToolOutput, Box<dyn std::error::Error + Send + Sync>>;
}

pub fn to_provider_tool(tool: &dyn ToolTrait) -> Tool {
    Tool::new(tool.name(), tool.description(), tool.parameters())
}

/// Name to handler map, read-only once shared
pub struct ToolRegistry {
    tools: HashMap<String, SharedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<SharedTool> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> impl Iterator<Item = &SharedTool> {
        self.tools.values()
    }

    /// Provider definitions, sorted by name
    pub fn definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools()
            .map(|t| to_provider_tool(t.as_ref()))
            .collect();
        tools.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        tools
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the built-in tools against `workspace`
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    workspace: &Path,
    command_timeout: Duration,
) {
    registry.register(AttemptCompletionTool);

    registry.register(ReadFileTool::new(workspace.to_path_buf()));
    registry.register(WriteToFileTool::new(workspace.to_path_buf()));
    registry.register(ListFilesTool::new(workspace.to_path_buf()));

    registry.register(ExecuteCommandTool::new(
        workspace.to_path_buf(),
        command_timeout,
    ));
}
