//! Scripted provider for driving the engine without a network.
//!
//! Each call to [`Provider::stream`] pops the next [`ScriptedTurn`]. Requests
//! are recorded so tests can inspect what the orchestrator sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use ratchet_provider::{
    EventStream, Provider, ProviderError, StreamEvent, StreamParams, ToolCallChunk,
};
use serde_json::Value;

/// What the provider does on one call
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream these events, then end
    Events(Vec<StreamEvent>),
    /// Fail before any event is produced
    Fail(String),
    /// Stream these events, then a transport error
    Broken(Vec<StreamEvent>, String),
    /// Never produce anything
    Stall,
}

impl ScriptedTurn {
    /// Text events, one per fragment
    pub fn chunks(fragments: &[&str]) -> Self {
        ScriptedTurn::Events(
            fragments
                .iter()
                .map(|f| StreamEvent::Text(f.to_string()))
                .collect(),
        )
    }

    pub fn text(text: &str) -> Self {
        Self::chunks(&[text])
    }

    /// Start, one delta per two-character slice of the JSON, end
    pub fn native_call(id: &str, name: &str, arguments: Value) -> Vec<StreamEvent> {
        let json = arguments.to_string();
        let mut events = vec![StreamEvent::ToolCallPartial(ToolCallChunk::Start {
            id: id.to_string(),
            name: name.to_string(),
        })];
        let chars: Vec<char> = json.chars().collect();
        for piece in chars.chunks(2) {
            events.push(StreamEvent::ToolCallPartial(ToolCallChunk::Delta {
                id: id.to_string(),
                arguments: piece.iter().collect(),
            }));
        }
        events.push(StreamEvent::ToolCallPartial(ToolCallChunk::End {
            id: id.to_string(),
        }));
        events
    }
}

/// Xml markup for a completion with `result`
pub fn completion_xml(result: &str) -> String {
    format!(
        "<attempt_completion><result>{}</result></attempt_completion>",
        result
    )
}

pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<StreamParams>>,
    native: bool,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            native: false,
        }
    }

    pub fn with_native_tools(mut self) -> Self {
        self.native = true;
        self
    }

    /// Number of `stream` calls so far
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<StreamParams> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn stream(&self, params: StreamParams) -> ratchet_provider::Result<EventStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(params);
        }
        let turn = self
            .turns
            .lock()
            .map_err(|_| ProviderError::Api("script lock poisoned".to_string()))?
            .pop_front();

        match turn {
            Some(ScriptedTurn::Events(events)) => {
                Ok(Box::pin(futures::stream::iter(
                    events.into_iter().map(Ok::<_, ProviderError>),
                )))
            }
            Some(ScriptedTurn::Fail(message)) => Err(ProviderError::Api(message)),
            Some(ScriptedTurn::Broken(events, message)) => {
                let items = events
                    .into_iter()
                    .map(Ok::<_, ProviderError>)
                    .chain(std::iter::once(Err(ProviderError::Stream(message))));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(ScriptedTurn::Stall) => Ok(Box::pin(futures::stream::pending::<
                ratchet_provider::Result<StreamEvent>,
            >())),
            None => Err(ProviderError::Api("script exhausted".to_string())),
        }
    }

    fn default_model(&self) -> String {
        "scripted".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn supports_native_tools(&self) -> bool {
        self.native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_turns_pop_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::text("one"),
            ScriptedTurn::Fail("two".into()),
        ]);

        let events: Vec<_> = provider
            .stream(StreamParams::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(provider.stream(StreamParams::default()).await.is_err());
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.remaining(), 0);
    }

    #[test]
    fn test_native_call_reassembles() {
        let events = ScriptedTurn::native_call("c", "read_file", json!({"path": "a"}));
        let args: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallPartial(ToolCallChunk::Delta { arguments, .. }) => {
                    Some(arguments.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(args, "{\"path\":\"a\"}");
    }
}
