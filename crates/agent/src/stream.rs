//! Draining one provider stream into finalized blocks

use std::time::Duration;

use futures::StreamExt;
use ratchet_provider::{
    ContentBlock, Provider, StreamEvent, StreamParams, ToolCallChunk, ToolInput, ToolProtocol,
    ToolUse, Usage,
};
use tracing::{debug, trace};

use crate::assembler::NativeCallAssembler;
use crate::block::{AssistantBlock, BlockBody};
use crate::error::{Result, StreamFailure, TaskError};
use crate::parser::{TagParser, TagVocabulary, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_PARAM_BYTES};

/// Limits applied to a single turn
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub timeout: Duration,
    pub max_message_bytes: usize,
    pub max_param_bytes: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_param_bytes: DEFAULT_MAX_PARAM_BYTES,
        }
    }
}

/// Everything one turn produced
#[derive(Debug, Default)]
pub struct TurnOutput {
    /// All final, in stream order
    pub blocks: Vec<AssistantBlock>,
    /// Kept apart from `blocks`; never persisted
    pub reasoning: String,
    pub usage: Usage,
    pub events: usize,
}

impl TurnOutput {
    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUse> {
        self.blocks.iter().filter_map(AssistantBlock::as_tool_use)
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    /// Text blocks joined by newlines
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(AssistantBlock::as_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_content(self) -> Vec<ContentBlock> {
        self.blocks
            .into_iter()
            .filter_map(AssistantBlock::into_content)
            .filter(|block| !block.is_empty())
            .collect()
    }
}

pub struct StreamConsumer<'a> {
    provider: &'a dyn Provider,
    vocabulary: &'a TagVocabulary,
    limits: StreamLimits,
}

impl<'a> StreamConsumer<'a> {
    pub fn new(provider: &'a dyn Provider, vocabulary: &'a TagVocabulary, limits: StreamLimits) -> Self {
        Self {
            provider,
            vocabulary,
            limits,
        }
    }

    /// Open the stream and drain it, both under the turn timeout
    pub async fn consume(&self, params: StreamParams) -> Result<TurnOutput> {
        match tokio::time::timeout(self.limits.timeout, self.drain(params)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::ApiTimeout(self.limits.timeout)),
        }
    }

    async fn drain(&self, params: StreamParams) -> Result<TurnOutput> {
        let protocol = params.protocol;
        let mut stream = self.provider.stream(params).await?;

        let mut parser = TagParser::with_limits(
            self.vocabulary.clone(),
            self.limits.max_message_bytes,
            self.limits.max_param_bytes,
        );
        let mut assembler = NativeCallAssembler::new();
        // Native text and tool calls; under xml only streamed call deltas land here
        let mut blocks: Vec<AssistantBlock> = Vec::new();
        let mut reasoning = String::new();
        let mut usage = Usage::default();
        let mut events = 0usize;

        while let Some(event) = stream.next().await {
            let event = event
                .map_err(|e| TaskError::StreamingFailed(StreamFailure::Chunk(e.to_string())))?;
            events += 1;

            match event {
                StreamEvent::Usage(u) => usage.add(&u),
                StreamEvent::Text(text) => match protocol {
                    ToolProtocol::Xml => parser.push(&text)?,
                    ToolProtocol::Native => append_text(&mut blocks, &text),
                },
                StreamEvent::Reasoning(text) => reasoning.push_str(&text),
                StreamEvent::ToolCallPartial(chunk) => match chunk {
                    ToolCallChunk::Start { id, name } => assembler.start(&mut blocks, &id, &name),
                    ToolCallChunk::Delta { id, arguments } => assembler.delta(&id, &arguments),
                    ToolCallChunk::End { id } => assembler.end(&mut blocks, &id)?,
                },
                StreamEvent::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    trace!("complete tool call {} ({})", name, id);
                    let block = AssistantBlock::draft_tool(ToolUse::new(
                        id,
                        name,
                        ToolInput::Native(arguments),
                    ))
                    .finalize();
                    match protocol {
                        ToolProtocol::Xml => parser.push_block(block),
                        ToolProtocol::Native => blocks.push(block),
                    }
                }
            }
        }

        if events == 0 {
            return Err(TaskError::NoApiResponse);
        }

        assembler.finish(&mut blocks);
        for block in blocks.iter_mut() {
            block.finalize_in_place();
        }

        let blocks = match protocol {
            ToolProtocol::Xml => {
                parser.finalize();
                let mut parsed = parser.into_blocks();
                parsed.extend(blocks);
                parsed
            }
            ToolProtocol::Native => blocks,
        };

        if !reasoning.is_empty() {
            debug!("model reasoning ({} chars): {}", reasoning.len(), reasoning);
        }
        debug!(
            "turn finished: {} events, {} blocks, {} tokens",
            events,
            blocks.len(),
            usage.total_tokens
        );

        Ok(TurnOutput {
            blocks,
            reasoning,
            usage,
            events,
        })
    }
}

/// Grow the trailing draft text block, or start one
fn append_text(blocks: &mut Vec<AssistantBlock>, text: &str) {
    if let Some(BlockBody::Text(existing)) = blocks.last_mut().and_then(AssistantBlock::draft_mut) {
        existing.push_str(text);
        return;
    }
    blocks.push(AssistantBlock::draft_text(text));
}
