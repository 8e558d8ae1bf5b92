//! Append-only conversation history

use ratchet_provider::{ApiMessage, Role};
use serde::Serialize;

/// Messages exchanged during a task, oldest first. Nothing is ever removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationHistory {
    messages: Vec<ApiMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ApiMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ApiMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ApiMessage> {
        self.messages.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApiMessage> {
        self.messages.iter()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}
