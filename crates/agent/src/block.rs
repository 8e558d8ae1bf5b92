//! Streamed assistant blocks
//!
//! A block is open (`Draft`) while the stream can still grow it and closed
//! (`Final`) once its closing tag or call end arrived. Finalizing consumes the
//! draft, so a final block has no mutable accessor.

use ratchet_provider::{ContentBlock, ToolUse};

#[derive(Debug, Clone, PartialEq)]
pub enum BlockBody {
    Text(String),
    ToolUse(ToolUse),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssistantBlock {
    Draft(BlockBody),
    Final(BlockBody),
}

impl AssistantBlock {
    pub fn draft_text(text: impl Into<String>) -> Self {
        AssistantBlock::Draft(BlockBody::Text(text.into()))
    }

    pub fn draft_tool(tool_use: ToolUse) -> Self {
        AssistantBlock::Draft(BlockBody::ToolUse(tool_use))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, AssistantBlock::Draft(_))
    }

    pub fn body(&self) -> &BlockBody {
        match self {
            AssistantBlock::Draft(body) | AssistantBlock::Final(body) => body,
        }
    }

    /// Mutable access, only while the block is still a draft
    pub fn draft_mut(&mut self) -> Option<&mut BlockBody> {
        match self {
            AssistantBlock::Draft(body) => Some(body),
            AssistantBlock::Final(_) => None,
        }
    }

    pub fn finalize(self) -> Self {
        match self {
            AssistantBlock::Draft(body) => AssistantBlock::Final(body),
            done => done,
        }
    }

    /// Finalize a block that lives inside a collection
    pub fn finalize_in_place(&mut self) {
        if self.is_partial() {
            let placeholder = AssistantBlock::Final(BlockBody::Text(String::new()));
            let draft = std::mem::replace(self, placeholder);
            *self = draft.finalize();
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.body() {
            BlockBody::Text(text) => Some(text),
            BlockBody::ToolUse(_) => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self.body() {
            BlockBody::ToolUse(tool_use) => Some(tool_use),
            BlockBody::Text(_) => None,
        }
    }

    /// Convert a final block into history content; drafts yield nothing
    pub fn into_content(self) -> Option<ContentBlock> {
        match self {
            AssistantBlock::Final(BlockBody::Text(text)) => Some(ContentBlock::Text { text }),
            AssistantBlock::Final(BlockBody::ToolUse(tool_use)) => {
                Some(ContentBlock::ToolUse(tool_use))
            }
            AssistantBlock::Draft(_) => None,
        }
    }
}
