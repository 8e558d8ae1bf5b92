//! OpenRouter/OpenAI-compatible streaming provider
//!
//! Posts chat-completion requests with `stream: true` and decodes the SSE body
//! (`data: …\n\n` frames) into [`StreamEvent`]s.

use crate::*;
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace, warn};

/// OpenRouter/OpenAI-compatible streaming client
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
    native_tools: bool,
}

impl OpenRouterProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        let is_openrouter = api_key.starts_with("sk-or-")
            || api_base
                .as_ref()
                .map(|b| b.contains("openrouter"))
                .unwrap_or(false);

        let api_base = api_base.unwrap_or_else(|| {
            if is_openrouter {
                "https://openrouter.ai/api/v1".to_string()
            } else {
                "https://api.openai.com/v1".to_string()
            }
        });

        let default_model = default_model.unwrap_or_else(|| {
            if is_openrouter {
                "anthropic/claude-sonnet-4".to_string()
            } else {
                "gpt-4o".to_string()
            }
        });

        Self {
            client: Client::new(),
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model,
            native_tools: true,
        }
    }

    /// Declare whether the target model accepts function definitions
    pub fn with_native_tools(mut self, enabled: bool) -> Self {
        self.native_tools = enabled;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn build_request(&self, params: &StreamParams) -> serde_json::Value {
        let mut messages = Vec::new();
        if !params.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": &params.system_prompt }));
        }
        for message in &params.messages {
            match params.protocol {
                ToolProtocol::Xml => messages.push(xml_message(message)),
                ToolProtocol::Native => messages.extend(native_messages(message)),
            }
        }

        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if params.protocol == ToolProtocol::Native && !params.tools.is_empty() {
            body["tools"] = json!(params.tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

/// Flatten a message into one text message; tool traffic is rendered inline
fn xml_message(message: &ApiMessage) -> serde_json::Value {
    let parts: Vec<String> = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::ToolUse(tool_use) => tool_use.to_xml(),
            ContentBlock::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => {
                if *is_error {
                    format!("[{tool_name}] Error:\n{content}")
                } else {
                    format!("[{tool_name}] Result:\n{content}")
                }
            }
        })
        .collect();
    json!({ "role": message.role.as_str(), "content": parts.join("\n\n") })
}

/// Split a message into the chat-completions shape for function calling
fn native_messages(message: &ApiMessage) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text } => texts.push(text.clone()),
            ContentBlock::ToolUse(tool_use) => tool_calls.push(json!({
                "id": &tool_use.id,
                "type": "function",
                "function": {
                    "name": &tool_use.name,
                    "arguments": tool_use.input.to_args().to_string(),
                }
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } => {
                let content = if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                };
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
        }
    }

    if !texts.is_empty() || !tool_calls.is_empty() {
        let mut obj = json!({ "role": message.role.as_str() });
        obj["content"] = if texts.is_empty() {
            serde_json::Value::Null
        } else {
            json!(texts.join("\n\n"))
        };
        if !tool_calls.is_empty() {
            obj["tool_calls"] = json!(tool_calls);
        }
        out.push(obj);
    }

    out
}

/// Incremental decoder for an OpenAI-style SSE body
///
/// Bytes are buffered until a blank line closes a frame, so frames and UTF-8
/// sequences split across network reads decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// Native calls in flight: `(choice delta index, call id)`
    open_calls: Vec<(u64, String)>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning events for every completed frame
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(end) = find_frame_end(&self.pending) {
            let frame: Vec<u8> = self.pending.drain(..end.0 + end.1).collect();
            let frame = String::from_utf8_lossy(&frame[..end.0]).to_string();
            if let Err(e) = self.process_frame(&frame, &mut out) {
                out.push(Err(e));
            }
        }

        out
    }

    /// Flush whatever is left once the body ends
    pub fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        let rest = String::from_utf8_lossy(&rest).to_string();
        if !rest.trim().is_empty() {
            if let Err(e) = self.process_frame(rest.trim(), &mut out) {
                out.push(Err(e));
            }
        }
        self.close_calls(&mut out);
        out
    }

    fn process_frame(&mut self, frame: &str, out: &mut Vec<Result<StreamEvent>>) -> Result<()> {
        let mut data = String::new();
        for line in frame.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(payload) = line
                .strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
            {
                let payload = payload.trim();
                if payload == "[DONE]" {
                    self.done = true;
                    self.close_calls(out);
                    return Ok(());
                }
                data.push_str(payload);
            }
        }

        if data.is_empty() || self.done {
            return Ok(());
        }

        let chunk: serde_json::Value = serde_json::from_str(&data)?;
        if let Some(message) = chunk["error"]["message"].as_str() {
            return Err(ProviderError::Api(message.to_string()));
        }
        self.process_chunk(&chunk, out);
        Ok(())
    }

    fn process_chunk(&mut self, chunk: &serde_json::Value, out: &mut Vec<Result<StreamEvent>>) {
        if let Some(usage) = chunk["usage"].as_object() {
            out.push(Ok(StreamEvent::Usage(Usage {
                prompt_tokens: usage
                    .get("prompt_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                total_tokens: usage
                    .get("total_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            })));
        }

        let Some(choice) = chunk["choices"].get(0) else {
            return;
        };
        let delta = &choice["delta"];

        for key in ["reasoning", "reasoning_content"] {
            if let Some(text) = delta[key].as_str() {
                if !text.is_empty() {
                    out.push(Ok(StreamEvent::Reasoning(text.to_string())));
                }
            }
        }

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                out.push(Ok(StreamEvent::Text(text.to_string())));
            }
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0);
                let incoming = call["id"].as_str().filter(|id| !id.is_empty());
                let open = self
                    .open_calls
                    .iter()
                    .position(|(i, _)| *i == index);

                // A new id on an open index starts another call
                let open = match (open, incoming) {
                    (Some(pos), Some(new_id)) if self.open_calls[pos].1 != new_id => {
                        let (_, old_id) = self.open_calls.remove(pos);
                        trace!("native call {} closed by new id {}", old_id, new_id);
                        out.push(Ok(StreamEvent::ToolCallPartial(ToolCallChunk::End {
                            id: old_id,
                        })));
                        None
                    }
                    (open, _) => open,
                };

                let id = match open {
                    Some(pos) => self.open_calls[pos].1.clone(),
                    None => {
                        let id = incoming
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("call_{index}"));
                        let name = call["function"]["name"].as_str().unwrap_or("").to_string();
                        trace!("native call {} opened: {}", id, name);
                        self.open_calls.push((index, id.clone()));
                        out.push(Ok(StreamEvent::ToolCallPartial(ToolCallChunk::Start {
                            id: id.clone(),
                            name,
                        })));
                        id
                    }
                };
                if let Some(arguments) = call["function"]["arguments"].as_str() {
                    if !arguments.is_empty() {
                        out.push(Ok(StreamEvent::ToolCallPartial(ToolCallChunk::Delta {
                            id,
                            arguments: arguments.to_string(),
                        })));
                    }
                }
            }
        }

        if choice["finish_reason"].is_string() {
            self.close_calls(out);
        }
    }

    fn close_calls(&mut self, out: &mut Vec<Result<StreamEvent>>) {
        for (_, id) in self.open_calls.drain(..) {
            out.push(Ok(StreamEvent::ToolCallPartial(ToolCallChunk::End { id })));
        }
    }
}

/// Position of the first blank-line frame terminator and its length
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn event_stream(response: reqwest::Response) -> EventStream {
    let bytes = Box::pin(response.bytes_stream());
    let stream = futures::stream::unfold(
        (bytes, SseDecoder::new(), false),
        |(mut bytes, mut decoder, finished)| async move {
            if finished {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = decoder.push(&chunk);
                    Some((events, (bytes, decoder, false)))
                }
                Some(Err(e)) => {
                    warn!("stream read error: {}", e);
                    Some((
                        vec![Err(ProviderError::Stream(e.to_string()))],
                        (bytes, decoder, true),
                    ))
                }
                None => {
                    let events = decoder.finish();
                    Some((events, (bytes, decoder, true)))
                }
            }
        },
    )
    .flat_map(futures::stream::iter);

    Box::pin(stream)
}

#[async_trait::async_trait]
impl Provider for OpenRouterProvider {
    async fn stream(&self, params: StreamParams) -> Result<EventStream> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }
        trace!("opening stream to {}", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&params);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }
            let text = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {status}: {text}"));
            return Err(ProviderError::Api(error));
        }

        debug!("stream opened ({} messages)", params.messages.len());
        Ok(event_stream(response))
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }
}
