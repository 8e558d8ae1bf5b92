//! Tool dispatch and result normalization

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::tools::ToolRegistry;

/// One element of a structured tool payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputPart {
    Text(String),
    /// Non-text part such as an image, kept as-is
    Other { kind: String, data: Value },
}

/// Everything a tool handler can hand back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolOutput {
    Text(String),
    Content(Vec<OutputPart>),
    Opaque(Value),
}

impl ToolOutput {
    /// Classify an untyped JSON payload.
    ///
    /// Strings become `Text`. An object with a `content` array, or a bare
    /// array, becomes `Content` when every element carries a string `type`.
    /// Anything else is `Opaque`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => ToolOutput::Text(text),
            Value::Array(items) => match typed_parts(&items) {
                Some(parts) => ToolOutput::Content(parts),
                None => ToolOutput::Opaque(Value::Array(items)),
            },
            Value::Object(map) => {
                let parts = match map.get("content") {
                    Some(Value::Array(items)) => typed_parts(items),
                    _ => None,
                };
                match parts {
                    Some(parts) => ToolOutput::Content(parts),
                    None => ToolOutput::Opaque(Value::Object(map)),
                }
            }
            other => ToolOutput::Opaque(other),
        }
    }

    /// Render the payload as the single string the model sees
    pub fn normalize(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Content(parts) => parts
                .iter()
                .map(|part| match part {
                    OutputPart::Text(text) => text.clone(),
                    OutputPart::Other { kind, .. } => format!("[{} content]", kind),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ToolOutput::Opaque(value) => value.to_string(),
        }
    }
}

fn typed_parts(items: &[Value]) -> Option<Vec<OutputPart>> {
    items
        .iter()
        .map(|item| {
            let kind = item.get("type")?.as_str()?;
            if kind == "text" {
                let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
                Some(OutputPart::Text(text.to_string()))
            } else {
                Some(OutputPart::Other {
                    kind: kind.to_string(),
                    data: item.clone(),
                })
            }
        })
        .collect()
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub normalized_text: String,
    pub raw_payload: ToolOutput,
}

impl ToolResult {
    pub fn new(output: ToolOutput) -> Self {
        Self {
            success: true,
            normalized_text: output.normalize(),
            raw_payload: output,
        }
    }
}

/// Resolves tool names and runs handlers under a timeout
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `name` with `args`.
    ///
    /// The handler runs on its own task. When the timeout wins the task is
    /// detached, not cancelled, so it may still complete its side effects.
    pub async fn invoke(&self, name: &str, args: Value, timeout: Duration) -> Result<ToolResult> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| TaskError::ToolNotFound(name.to_string()))?;

        debug!("dispatching tool {}", name);
        let handle = tokio::spawn(async move { tool.execute(args).await });

        match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                warn!("tool {} timed out after {:?}", name, timeout);
                Err(TaskError::ToolTimeout {
                    name: name.to_string(),
                    timeout,
                })
            }
            Ok(Err(join_error)) => Err(TaskError::tool_execution(name, join_error)),
            Ok(Ok(Err(error))) => match error.downcast::<TaskError>() {
                Ok(task_error) => Err(*task_error),
                Err(error) => Err(TaskError::ToolExecution {
                    name: name.to_string(),
                    source: error,
                }),
            },
            Ok(Ok(Ok(output))) => Ok(ToolResult::new(output)),
        }
    }
}
