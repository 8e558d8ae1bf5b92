//! Terminal tool: the model declares the task done

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::ToolTrait;
use crate::dispatch::ToolOutput;

/// Name the orchestrator treats as terminal
pub const COMPLETION_TOOL: &str = "attempt_completion";

pub struct AttemptCompletionTool;

#[derive(Deserialize)]
struct CompletionArgs {
    result: String,
}

#[async_trait]
impl ToolTrait for AttemptCompletionTool {
    fn name(&self) -> &str {
        COMPLETION_TOOL
    }
    fn description(&self) -> &str {
        "Present the final result of the task to the user. Use once the task is complete."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "result": { "type": "string", "description": "Final result shown to the user" }
            },
            "required": ["result"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
    ) -> Result<ToolOutput, Box<dyn std::error::Error + Send + Sync>> {
        let args: CompletionArgs = serde_json::from_value(args)
            .map_err(|e| format!("attempt_completion needs a 'result' parameter: {}", e))?;
        Ok(ToolOutput::Text(args.result))
    }
}
