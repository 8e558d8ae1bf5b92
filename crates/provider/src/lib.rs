//! Model provider contract
//!
//! Streamed response events, tool definitions and the `Provider` trait the
//! execution engine drives.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use thiserror::Error;

pub mod message;
pub mod openrouter;

pub use message::{ApiMessage, ContentBlock, Role, ToolInput, ToolProtocol, ToolUse};
pub use openrouter::OpenRouterProvider;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider rejected request: {0}")]
    Api(String),

    #[error("no API key configured")]
    NoApiKey,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("stream interrupted: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Lifecycle of one native function call, keyed by call id
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallChunk {
    Start { id: String, name: String },
    Delta { id: String, arguments: String },
    End { id: String },
}

/// One event of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Usage(Usage),
    Text(String),
    Reasoning(String),
    ToolCallPartial(ToolCallChunk),
    /// A complete native call delivered in one piece
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
}

/// Asynchronous sequence of response events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Function definition offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Function schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Request for one streamed turn
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ApiMessage>,
    /// Sent to the provider only under the native protocol
    pub tools: Vec<Tool>,
    pub protocol: ToolProtocol,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            protocol: ToolProtocol::Xml,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// A model backend that answers with a stream of events
#[async_trait]
pub trait Provider: Send + Sync {
    async fn stream(&self, params: StreamParams) -> Result<EventStream>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
    /// Whether the backend accepts structured function definitions
    fn supports_native_tools(&self) -> bool;
}

/// Build JSON schema
pub fn object_schema(properties: Vec<(String, String, bool)>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, description, is_required) in properties {
        props.insert(
            name.clone(),
            serde_json::json!({
                "type": "string",
                "description": description
            }),
        );
        if is_required {
            required.push(name);
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required
    })
}

/// Parameter names declared by a JSON schema
pub fn schema_properties(schema: &Value) -> Vec<String> {
    schema["properties"]
        .as_object()
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}
