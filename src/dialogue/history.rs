//! Conversation history shared between the responder and its observers.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Role of a message in the conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// History handle shared across threads.
pub type SharedHistory = Arc<Mutex<DialogueHistory>>;

/// System prompt plus alternating user/assistant turns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DialogueHistory {
    system_prompt: String,
    turns: Vec<ChatMessage>,
    /// Keep at most this many user/assistant exchanges; `None` keeps all.
    max_turns: Option<usize>,
}

impl DialogueHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            turns: Vec::new(),
            max_turns: None,
        }
    }

    /// Limits the history to the most recent `max` exchanges (0 keeps all).
    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = (max > 0).then_some(max);
        self
    }

    /// Wraps the history for sharing.
    pub fn shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ChatMessage::assistant(content));
        self.trim();
    }

    /// Removes the trailing user message, if the history ends with one.
    ///
    /// Used to undo a user turn whose reply could not be generated, keeping
    /// the history strictly alternating.
    pub fn rollback_user(&mut self) -> Option<ChatMessage> {
        match self.turns.last() {
            Some(message) if message.role == MessageRole::User => self.turns.pop(),
            _ => None,
        }
    }

    /// Messages to send to a responder: the system prompt first, then the turns.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.turns.iter().cloned());
        messages
    }

    /// User and assistant messages, oldest first.
    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the history as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    fn trim(&mut self) {
        let Some(max) = self.max_turns else {
            return;
        };
        let limit = max * 2;
        if self.turns.len() > limit {
            let excess = self.turns.len() - limit;
            self.turns.drain(..excess);
        }
    }
}

impl Default for DialogueHistory {
    fn default() -> Self {
        Self::new(crate::defaults::SYSTEM_PROMPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_start_with_system_prompt() {
        let mut history = DialogueHistory::new("be brief");
        history.push_user("hi");
        history.push_assistant("hello");

        let messages = history.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[2].role, MessageRole::Assistant);
    }

    #[test]
    fn test_rollback_removes_only_trailing_user() {
        let mut history = DialogueHistory::new("p");
        history.push_user("one");
        history.push_assistant("reply");
        assert!(history.rollback_user().is_none());

        history.push_user("two");
        let removed = history.rollback_user().unwrap();
        assert_eq!(removed.content, "two");
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_max_turns_keeps_recent_exchanges() {
        let mut history = DialogueHistory::new("p").with_max_turns(2);
        for i in 0..4 {
            history.push_user(format!("u{i}"));
            history.push_assistant(format!("a{i}"));
        }

        let contents: Vec<_> = history.turns().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u2", "a2", "u3", "a3"]);
    }

    #[test]
    fn test_zero_max_turns_is_unlimited() {
        let mut history = DialogueHistory::new("p").with_max_turns(0);
        for _ in 0..10 {
            history.push_user("u");
            history.push_assistant("a");
        }
        assert_eq!(history.len(), 20);
    }

    #[test]
    fn test_json_export() {
        let mut history = DialogueHistory::new("p");
        history.push_user("hi");

        let json = history.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["system_prompt"], "p");
        assert_eq!(value["turns"][0]["role"], "user");
        assert_eq!(value["turns"][0]["content"], "hi");
    }

    #[test]
    fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        let history = DialogueHistory::default();

        history.write_json(&path).unwrap();
        let loaded: DialogueHistory =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.system_prompt(), crate::defaults::SYSTEM_PROMPT);
    }
}
