//! Canned messages fed back to the model

use ratchet_provider::{ContentBlock, ToolProtocol};

use crate::error::TaskError;
use crate::tools::COMPLETION_TOOL;

/// Nudge sent after a response without any tool use
pub fn no_tools_used(protocol: ToolProtocol) -> ContentBlock {
    let how = match protocol {
        ToolProtocol::Xml => format!(
            "Tool uses are formatted with XML-style tags, for example:\n\n\
             <{tool}>\n<result>\nDescribe what was done\n</result>\n</{tool}>",
            tool = COMPLETION_TOOL
        ),
        ToolProtocol::Native => {
            "Call one of the provided functions through the function calling interface."
                .to_string()
        }
    };
    ContentBlock::text(format!(
        "[ERROR] You did not use a tool in your previous response! Please retry with a tool use.\n\n\
         {}\n\n\
         If the task is complete, use the {} tool. Otherwise pick the tool that moves the task forward.",
        how, COMPLETION_TOOL
    ))
}

/// Body of an error tool result
pub fn tool_error(error: &TaskError) -> String {
    format!(
        "The tool execution failed with the following error:\n<error>\n{}\n</error>",
        error
    )
}

/// Body of a result for a tool use that was never executed
pub fn tool_skipped(name: &str) -> String {
    format!(
        "The {} tool was not executed because the task ended before it ran.",
        name
    )
}
