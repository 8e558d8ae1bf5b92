//! Conversation messages and the content blocks they carry

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Encoding the model uses to express a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolProtocol {
    /// Inline pseudo-tags in free text
    #[default]
    Xml,
    /// Provider-native function calling channel
    Native,
}

impl std::fmt::Display for ToolProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolProtocol::Xml => write!(f, "xml"),
            ToolProtocol::Native => write!(f, "native"),
        }
    }
}

/// Arguments of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolInput {
    /// Named string parameters parsed from inline tags
    Params(BTreeMap<String, String>),
    /// Opaque JSON arguments from a native function call
    Native(Value),
}

impl ToolInput {
    /// Arguments as a JSON object, the shape tool handlers receive
    pub fn to_args(&self) -> Value {
        match self {
            ToolInput::Params(params) => Value::Object(
                params
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            ToolInput::Native(Value::Null) => Value::Object(Default::default()),
            ToolInput::Native(value) => value.clone(),
        }
    }
}

impl Default for ToolInput {
    fn default() -> Self {
        ToolInput::Params(BTreeMap::new())
    }
}

/// A single tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: ToolInput,
}

impl ToolUse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Render the invocation in the inline-tag form the model writes
    pub fn to_xml(&self) -> String {
        let mut out = format!("<{}>\n", self.name);
        match &self.input {
            ToolInput::Params(params) => {
                for (key, value) in params {
                    out.push_str(&format!("<{key}>{value}</{key}>\n"));
                }
            }
            ToolInput::Native(Value::Object(map)) => {
                for (key, value) in map {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out.push_str(&format!("<{key}>{value}</{key}>\n"));
                }
            }
            ToolInput::Native(Value::Null) => {}
            ToolInput::Native(other) => {
                out.push_str(&format!("<arguments>{other}</arguments>\n"));
            }
        }
        out.push_str(&format!("</{}>", self.name));
        out
    }
}

/// Content of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse(ToolUse),
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        }
    }

    /// Whether the block carries nothing worth sending
    pub fn is_empty(&self) -> bool {
        matches!(self, ContentBlock::Text { text } if text.trim().is_empty())
    }
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub timestamp: DateTime<Local>,
}

impl ApiMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            timestamp: Local::now(),
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUse> {
        self.content.iter().filter_map(ContentBlock::as_tool_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_to_args() {
        let mut params = BTreeMap::new();
        params.insert("path".to_string(), "src/main.rs".to_string());
        let input = ToolInput::Params(params);
        assert_eq!(input.to_args(), json!({"path": "src/main.rs"}));
    }

    #[test]
    fn test_native_null_becomes_empty_object() {
        assert_eq!(ToolInput::Native(Value::Null).to_args(), json!({}));
        assert_eq!(
            ToolInput::Native(json!({"a": 1})).to_args(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_tool_use_to_xml() {
        let mut params = BTreeMap::new();
        params.insert("result".to_string(), "done".to_string());
        let tool_use = ToolUse::new("t1", "attempt_completion", ToolInput::Params(params));
        assert_eq!(
            tool_use.to_xml(),
            "<attempt_completion>\n<result>done</result>\n</attempt_completion>"
        );
    }

    #[test]
    fn test_native_tool_use_to_xml_stringifies_values() {
        let tool_use = ToolUse::new(
            "c1",
            "read_file",
            ToolInput::Native(json!({"path": "a.txt", "limit": 3})),
        );
        let xml = tool_use.to_xml();
        assert!(xml.contains("<path>a.txt</path>"));
        assert!(xml.contains("<limit>3</limit>"));
    }

    #[test]
    fn test_message_text_skips_tool_blocks() {
        let msg = ApiMessage::assistant(vec![
            ContentBlock::text("first"),
            ContentBlock::ToolUse(ToolUse::new("t", "x", ToolInput::default())),
            ContentBlock::text("second"),
        ]);
        assert_eq!(msg.text(), "first\nsecond");
        assert_eq!(msg.tool_uses().count(), 1);
        assert_eq!(msg.role.as_str(), "assistant");
    }

    #[test]
    fn test_content_block_serialization_is_tagged() {
        let block = ContentBlock::tool_result("t1", "read_file", "ok", false);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool_use_id"], "t1");

        let block = ContentBlock::ToolUse(ToolUse::new("t2", "list_files", ToolInput::default()));
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "list_files");
        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_empty_text_block() {
        assert!(ContentBlock::text("  \n").is_empty());
        assert!(!ContentBlock::text("x").is_empty());
        assert!(!ContentBlock::tool_result("a", "b", "", false).is_empty());
    }

    #[test]
    fn test_protocol_serde_lowercase() {
        assert_eq!(serde_json::to_string(&ToolProtocol::Native).unwrap(), "\"native\"");
        let p: ToolProtocol = serde_json::from_str("\"xml\"").unwrap();
        assert_eq!(p, ToolProtocol::Xml);
        assert_eq!(ToolProtocol::default(), ToolProtocol::Xml);
    }
}
