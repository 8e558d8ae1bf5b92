//! The task loop
//!
//! [`Orchestrator::run`] drives turns until the model calls the completion
//! tool or a fatal error ends the task. Follow-up turns and retries are
//! frames on an explicit stack; the loop never recurses.
//!
//! Two counters bound a run. `retry_attempt` lives on each frame and limits
//! how often one input is resubmitted after a retryable failure.
//! `consecutive_mistake_count` lives on the task and counts turns in which
//! the model made no progress; it survives across `run` calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ratchet_config::{Config, ProtocolPreference};
use ratchet_provider::{
    ApiMessage, ContentBlock, Provider, Role, StreamParams, ToolProtocol, ToolUse, Usage,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatch::ToolDispatcher;
use crate::error::{Result, TaskError};
use crate::history::ConversationHistory;
use crate::mentions::{MentionExpander, NoMentions};
use crate::parser::TagVocabulary;
use crate::protocol::{ConfiguredProtocol, ProtocolResolver};
use crate::responses;
use crate::stream::{StreamConsumer, StreamLimits};
use crate::tools::{ToolRegistry, COMPLETION_TOOL};

/// Engine settings for one orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub consecutive_mistake_limit: u32,
    pub max_retry_attempts: u32,
    pub api_request_timeout: Duration,
    pub tool_timeout: Duration,
    pub protocol: ProtocolPreference,
    pub max_message_bytes: usize,
    pub max_param_bytes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.provider.model.clone(),
            system_prompt: String::new(),
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            consecutive_mistake_limit: config.engine.consecutive_mistake_limit,
            max_retry_attempts: config.engine.max_retry_attempts,
            api_request_timeout: config.engine.api_request_timeout(),
            tool_timeout: config.engine.tool_timeout(),
            protocol: config.engine.protocol,
            max_message_bytes: config.engine.max_message_bytes,
            max_param_bytes: config.engine.max_param_bytes,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            timeout: self.api_request_timeout,
            max_message_bytes: self.max_message_bytes,
            max_param_bytes: self.max_param_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Aborted,
}

#[derive(Debug)]
pub struct TaskState {
    pub status: TaskStatus,
    pub consecutive_mistake_count: u32,
    pub consecutive_mistake_limit: u32,
    /// Retryable failures of the current run, oldest first
    pub collected_errors: Vec<TaskError>,
}

impl TaskState {
    fn new(consecutive_mistake_limit: u32) -> Self {
        Self {
            status: TaskStatus::Running,
            consecutive_mistake_count: 0,
            consecutive_mistake_limit,
            collected_errors: Vec::new(),
        }
    }

    fn mistake_limit_reached(&self) -> bool {
        self.consecutive_mistake_count > 0
            && self.consecutive_mistake_count >= self.consecutive_mistake_limit
    }
}

/// One pending pass through the loop
#[derive(Debug, Clone, PartialEq)]
pub struct PendingContinuation {
    pub user_content: Vec<ContentBlock>,
    pub retry_attempt: u32,
    /// Re-append the user message even on a retry
    pub user_message_was_removed: bool,
}

impl PendingContinuation {
    pub fn new(user_content: Vec<ContentBlock>) -> Self {
        Self {
            user_content,
            retry_attempt: 0,
            user_message_was_removed: false,
        }
    }
}

/// Cooperative cancellation, observed at the top of each loop iteration
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolUsage {
    pub attempts: u32,
    pub failures: u32,
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    dispatcher: ToolDispatcher,
    vocabulary: TagVocabulary,
    protocol: Box<dyn ProtocolResolver>,
    mentions: Box<dyn MentionExpander>,
    config: OrchestratorConfig,
    state: TaskState,
    history: ConversationHistory,
    stack: Vec<PendingContinuation>,
    abort: AbortHandle,
    active_protocol: ToolProtocol,
    tool_usage: HashMap<String, ToolUsage>,
    usage: Usage,
    completion: Option<String>,
    /// Results of the latest tool batch, by tool use id
    last_results: HashMap<String, ContentBlock>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let protocol = ConfiguredProtocol::new(config.protocol, provider.supports_native_tools());
        Self {
            vocabulary: TagVocabulary::from_registry(&registry),
            dispatcher: ToolDispatcher::new(registry),
            provider,
            protocol: Box::new(protocol),
            mentions: Box::new(NoMentions),
            state: TaskState::new(config.consecutive_mistake_limit),
            config,
            history: ConversationHistory::new(),
            stack: Vec::new(),
            abort: AbortHandle::default(),
            active_protocol: ToolProtocol::Xml,
            tool_usage: HashMap::new(),
            usage: Usage::default(),
            completion: None,
            last_results: HashMap::new(),
        }
    }

    pub fn with_protocol_resolver(mut self, resolver: impl ProtocolResolver + 'static) -> Self {
        self.protocol = Box::new(resolver);
        self
    }

    pub fn with_mention_expander(mut self, expander: impl MentionExpander + 'static) -> Self {
        self.mentions = Box::new(expander);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn pending(&self) -> &[PendingContinuation] {
        &self.stack
    }

    pub fn tool_usage(&self) -> &HashMap<String, ToolUsage> {
        &self.tool_usage
    }

    /// Tokens reported across every turn so far
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Result text of the last successful completion
    pub fn completion(&self) -> Option<&str> {
        self.completion.as_deref()
    }

    /// Run the task until the completion tool succeeds.
    ///
    /// Returns `Ok(true)` on completion. Every other exit is an error:
    /// `TaskAborted`, `ConsecutiveMistakeLimit`, a non-retryable streaming
    /// failure, or `MaxRetryExceeded` carrying all retryable failures seen.
    pub async fn run(&mut self, initial_user_content: Vec<ContentBlock>) -> Result<bool> {
        self.state.status = TaskStatus::Running;
        self.state.collected_errors.clear();
        self.completion = None;
        self.stack.clear();

        let mut content = self.answer_open_tool_uses();
        content.extend(initial_user_content);
        self.stack.push(PendingContinuation::new(content));

        while let Some(frame) = self.stack.pop() {
            match self.turn(&frame).await {
                Ok(true) => {
                    self.stack.clear();
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => self.recover(frame, err)?,
            }
        }
        Ok(false)
    }

    async fn turn(&mut self, frame: &PendingContinuation) -> Result<bool> {
        if self.abort.is_aborted() {
            self.state.status = TaskStatus::Aborted;
        }
        if self.state.status == TaskStatus::Aborted {
            info!("task aborted");
            return Err(TaskError::TaskAborted);
        }
        if self.state.mistake_limit_reached() {
            warn!(
                "consecutive mistake limit ({}) reached",
                self.state.consecutive_mistake_limit
            );
            self.state.consecutive_mistake_count = 0;
            return Err(TaskError::ConsecutiveMistakeLimit {
                limit: self.state.consecutive_mistake_limit,
            });
        }

        let protocol = self.protocol.resolve();
        self.active_protocol = protocol;

        let content = self.mentions.expand(frame.user_content.clone()).await;
        let has_content = content.iter().any(|block| !block.is_empty());
        if (frame.retry_attempt == 0 && has_content) || frame.user_message_was_removed {
            self.history.push(ApiMessage::user(content));
        }

        let params = StreamParams {
            model: self.config.model.clone(),
            system_prompt: self.config.system_prompt.clone(),
            messages: self.history.messages().to_vec(),
            tools: match protocol {
                ToolProtocol::Native => self.dispatcher.registry().definitions(),
                ToolProtocol::Xml => Vec::new(),
            },
            protocol,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        debug!(
            "turn: protocol {}, {} messages, retry {}",
            protocol,
            params.messages.len(),
            frame.retry_attempt
        );

        let consumer = StreamConsumer::new(
            self.provider.as_ref(),
            &self.vocabulary,
            self.config.stream_limits(),
        );
        let output = consumer.consume(params).await?;
        self.usage.add(&output.usage);

        let assistant_content = output.into_content();
        let tool_uses: Vec<ToolUse> = assistant_content
            .iter()
            .filter_map(ContentBlock::as_tool_use)
            .cloned()
            .collect();

        if tool_uses.is_empty() {
            if !assistant_content.is_empty() {
                self.history.push(ApiMessage::assistant(assistant_content));
            }
            self.state.consecutive_mistake_count += 1;
            debug!(
                "no tool use, mistake count {}",
                self.state.consecutive_mistake_count
            );
            return Err(TaskError::NoToolsUsed);
        }

        let (results, completed) = self.execute_tools(&tool_uses).await;
        self.history.push(ApiMessage::assistant(assistant_content));

        if completed {
            info!("task completed");
            return Ok(true);
        }
        self.stack.push(PendingContinuation::new(results));
        Ok(false)
    }

    /// Run tool uses in order. Failures become error results for the model.
    /// Stops right after a successful completion.
    async fn execute_tools(&mut self, tool_uses: &[ToolUse]) -> (Vec<ContentBlock>, bool) {
        let mut results = Vec::with_capacity(tool_uses.len());
        let mut any_succeeded = false;
        self.last_results.clear();

        for tool_use in tool_uses {
            let stats = self.tool_usage.entry(tool_use.name.clone()).or_default();
            stats.attempts += 1;

            let outcome = self
                .dispatcher
                .invoke(
                    &tool_use.name,
                    tool_use.input.to_args(),
                    self.config.tool_timeout,
                )
                .await;

            match outcome {
                Ok(result) => {
                    any_succeeded = true;
                    if tool_use.name == COMPLETION_TOOL {
                        self.completion = Some(result.normalized_text.clone());
                        results.push(ContentBlock::tool_result(
                            &tool_use.id,
                            &tool_use.name,
                            result.normalized_text,
                            false,
                        ));
                        self.state.consecutive_mistake_count = 0;
                        self.remember(&results);
                        return (results, true);
                    }
                    results.push(ContentBlock::tool_result(
                        &tool_use.id,
                        &tool_use.name,
                        result.normalized_text,
                        false,
                    ));
                }
                Err(err) => {
                    warn!("tool {} failed: {}", tool_use.name, err);
                    if let Some(stats) = self.tool_usage.get_mut(&tool_use.name) {
                        stats.failures += 1;
                    }
                    results.push(ContentBlock::tool_result(
                        &tool_use.id,
                        &tool_use.name,
                        responses::tool_error(&err),
                        true,
                    ));
                }
            }
        }

        if any_succeeded {
            self.state.consecutive_mistake_count = 0;
        } else {
            self.state.consecutive_mistake_count += 1;
            debug!(
                "every tool failed, mistake count {}",
                self.state.consecutive_mistake_count
            );
        }
        self.remember(&results);
        (results, false)
    }

    fn remember(&mut self, results: &[ContentBlock]) {
        for block in results {
            if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                self.last_results.insert(tool_use_id.clone(), block.clone());
            }
        }
    }

    /// Results owed for tool uses in a trailing assistant message.
    ///
    /// A run that ends on completion, abort or the mistake limit leaves the
    /// last assistant turn without its tool results. They go in front of the
    /// next user input: the recorded result where one exists, otherwise a
    /// not-executed notice.
    fn answer_open_tool_uses(&mut self) -> Vec<ContentBlock> {
        let Some(last) = self.history.last() else {
            return Vec::new();
        };
        if last.role != Role::Assistant {
            return Vec::new();
        }

        let owed: Vec<ContentBlock> = last
            .tool_uses()
            .map(|tool_use| {
                self.last_results
                    .get(&tool_use.id)
                    .cloned()
                    .unwrap_or_else(|| {
                        ContentBlock::tool_result(
                            &tool_use.id,
                            &tool_use.name,
                            responses::tool_skipped(&tool_use.name),
                            true,
                        )
                    })
            })
            .collect();
        if !owed.is_empty() {
            debug!("answering {} open tool uses from the previous run", owed.len());
        }
        self.last_results.clear();
        owed
    }

    fn recover(&mut self, frame: PendingContinuation, err: TaskError) -> Result<()> {
        if !err.is_retryable() {
            return Err(err);
        }

        let attempt = frame.retry_attempt;
        let no_tools = matches!(err, TaskError::NoToolsUsed);
        warn!(
            "turn failed ({}), attempt {} of {}: {}",
            err.kind(),
            attempt + 1,
            self.config.max_retry_attempts + 1,
            err
        );
        self.state.collected_errors.push(err);

        if attempt >= self.config.max_retry_attempts {
            let errors = std::mem::take(&mut self.state.collected_errors);
            return Err(TaskError::MaxRetryExceeded { errors });
        }

        let user_content = if no_tools {
            vec![responses::no_tools_used(self.active_protocol)]
        } else {
            frame.user_content
        };
        self.stack.push(PendingContinuation {
            user_content,
            retry_attempt: attempt + 1,
            user_message_was_removed: no_tools,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{completion_xml, ScriptedProvider, ScriptedTurn};
    use crate::tools::AttemptCompletionTool;

    fn orchestrator(turns: Vec<ScriptedTurn>, config: OrchestratorConfig) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(AttemptCompletionTool);
        let config = OrchestratorConfig {
            protocol: ProtocolPreference::Xml,
            ..config
        };
        Orchestrator::new(
            Arc::new(ScriptedProvider::new(turns)),
            Arc::new(registry),
            config,
        )
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let mut orchestrator = orchestrator(
            vec![ScriptedTurn::text(&completion_xml("pong"))],
            OrchestratorConfig::default(),
        );

        let done = orchestrator
            .run(vec![ContentBlock::text("ping")])
            .await
            .unwrap();

        assert!(done);
        assert_eq!(orchestrator.completion(), Some("pong"));
        assert!(orchestrator.pending().is_empty());
        assert_eq!(orchestrator.history().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_before_run() {
        let mut orchestrator = orchestrator(
            vec![ScriptedTurn::text(&completion_xml("x"))],
            OrchestratorConfig::default(),
        );
        orchestrator.abort_handle().abort();

        let err = orchestrator.run(vec![ContentBlock::text("hi")]).await.unwrap_err();
        assert!(matches!(err, TaskError::TaskAborted));
        assert_eq!(orchestrator.state().status, TaskStatus::Aborted);
        assert!(orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_retry_frame_does_not_duplicate_user_message() {
        let mut orchestrator = orchestrator(
            vec![
                ScriptedTurn::Fail("flaky".into()),
                ScriptedTurn::text(&completion_xml("ok")),
            ],
            OrchestratorConfig::default(),
        );

        assert!(orchestrator.run(vec![ContentBlock::text("go")]).await.unwrap());
        assert_eq!(orchestrator.history().count_role(ratchet_provider::Role::User), 1);
        assert_eq!(orchestrator.state().collected_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_no_tools_nudge_is_appended() {
        let mut orchestrator = orchestrator(
            vec![
                ScriptedTurn::text("I think the answer is pong."),
                ScriptedTurn::text(&completion_xml("pong")),
            ],
            OrchestratorConfig::default(),
        );

        assert!(orchestrator.run(vec![ContentBlock::text("ping")]).await.unwrap());

        let messages = orchestrator.history().messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].text(), "I think the answer is pong.");
        assert!(messages[2].text().contains("You did not use a tool"));
        assert_eq!(orchestrator.state().consecutive_mistake_count, 0);
    }

    #[test]
    fn test_config_from_file_values() {
        let mut file = Config::default();
        file.engine.max_retry_attempts = 9;
        file.engine.api_request_timeout_ms = 1_500;
        let config = OrchestratorConfig::from_config(&file).with_system_prompt("be brief");

        assert_eq!(config.max_retry_attempts, 9);
        assert_eq!(config.api_request_timeout, Duration::from_millis(1_500));
        assert_eq!(config.system_prompt, "be brief");
    }
}
