//! Tool-calling execution engine
//!
//! Drives a conversation with a model provider, turns its streamed output into
//! tool invocations under either the xml or the native protocol, runs those
//! tools and decides whether another turn is needed.

pub mod assembler;
pub mod block;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod mentions;
pub mod orchestrator;
pub mod parser;
pub mod protocol;
pub mod responses;
pub mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;

pub use assembler::NativeCallAssembler;
pub use block::{AssistantBlock, BlockBody};
pub use dispatch::{OutputPart, ToolDispatcher, ToolOutput, ToolResult};
pub use error::{Result, StreamFailure, TaskError};
pub use history::ConversationHistory;
pub use mentions::{FileMentionExpander, MentionExpander, NoMentions};
pub use orchestrator::{
    AbortHandle, Orchestrator, OrchestratorConfig, PendingContinuation, TaskState, TaskStatus,
    ToolUsage,
};
pub use parser::{ParserState, TagParser, TagVocabulary};
pub use protocol::{ConfiguredProtocol, FixedProtocol, ProtocolResolver};
pub use stream::{StreamConsumer, StreamLimits, TurnOutput};
pub use tools::{ToolRegistry, ToolTrait, COMPLETION_TOOL};
