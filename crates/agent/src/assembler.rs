//! Reassembly of native function-call deltas

use std::collections::HashMap;

use ratchet_provider::{ToolInput, ToolUse};
use serde_json::Value;
use tracing::{debug, warn};

use crate::block::{AssistantBlock, BlockBody};
use crate::error::{Result, StreamFailure, TaskError};

#[derive(Debug)]
struct OpenCall {
    index: usize,
    arguments: String,
}

/// Tracks in-flight calls by id, each bound to a stable index in the block
/// list it was started in.
#[derive(Debug, Default)]
pub struct NativeCallAssembler {
    calls: HashMap<String, OpenCall>,
}

impl NativeCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn start(&mut self, blocks: &mut Vec<AssistantBlock>, id: &str, name: &str) {
        if self.calls.contains_key(id) {
            warn!("duplicate start for tool call {}, ignoring", id);
            return;
        }
        blocks.push(AssistantBlock::draft_tool(ToolUse::new(
            id,
            name,
            ToolInput::Native(Value::Null),
        )));
        self.calls.insert(
            id.to_string(),
            OpenCall {
                index: blocks.len() - 1,
                arguments: String::new(),
            },
        );
        debug!("tool call {} started: {}", id, name);
    }

    pub fn delta(&mut self, id: &str, arguments: &str) {
        match self.calls.get_mut(id) {
            Some(call) => call.arguments.push_str(arguments),
            None => warn!("delta for unknown tool call {}", id),
        }
    }

    /// Parse the buffered arguments and finalize the block.
    ///
    /// Empty arguments become `{}`; malformed JSON is a chunk-level failure.
    pub fn end(&mut self, blocks: &mut [AssistantBlock], id: &str) -> Result<()> {
        let Some(call) = self.calls.remove(id) else {
            warn!("end for unknown tool call {}", id);
            return Ok(());
        };
        let value = parse_arguments(&call.arguments).map_err(|e| {
            TaskError::StreamingFailed(StreamFailure::Chunk(format!(
                "invalid arguments for tool call {}: {}",
                id, e
            )))
        })?;
        set_arguments(&mut blocks[call.index], value);
        blocks[call.index].finalize_in_place();
        Ok(())
    }

    /// Close calls the stream never ended, keeping whatever parses
    pub fn finish(&mut self, blocks: &mut [AssistantBlock]) {
        for (id, call) in self.calls.drain() {
            let value = parse_arguments(&call.arguments).unwrap_or_else(|e| {
                warn!("tool call {} left open with bad arguments: {}", id, e);
                Value::Object(Default::default())
            });
            set_arguments(&mut blocks[call.index], value);
            blocks[call.index].finalize_in_place();
        }
    }
}

fn parse_arguments(raw: &str) -> serde_json::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

fn set_arguments(block: &mut AssistantBlock, value: Value) {
    if let Some(BlockBody::ToolUse(tool_use)) = block.draft_mut() {
        tool_use.input = ToolInput::Native(value);
    }
}
