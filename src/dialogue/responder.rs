use crate::dialogue::history::{ChatMessage, MessageRole};
use crate::error::{ParleyError, Result};

/// Produces the assistant's next reply from the conversation so far.
///
/// The history always starts with the system prompt and ends with the
/// user turn being answered.
pub trait Responder: Send {
    fn generate(&mut self, history: &[ChatMessage]) -> Result<String>;

    /// Name of the model or strategy, for logging.
    fn name(&self) -> &str {
        "responder"
    }

    /// Check if the responder can serve requests
    fn is_ready(&self) -> bool {
        true
    }
}

fn last_user_message(history: &[ChatMessage]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::User)
        .map(|message| message.content.as_str())
}

/// Repeats the user's words back.
#[derive(Debug, Clone, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn generate(&mut self, history: &[ChatMessage]) -> Result<String> {
        let said = last_user_message(history).ok_or_else(|| ParleyError::Generation {
            message: "no user message to answer".to_string(),
        })?;
        Ok(format!("You said: {}", said))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Replies with a fixed script, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct ScriptedResponder {
    replies: Vec<String>,
    next: usize,
    should_fail: bool,
}

impl ScriptedResponder {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            next: 0,
            should_fail: false,
        }
    }

    /// Configure the responder to fail every request
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Responder for ScriptedResponder {
    fn generate(&mut self, _history: &[ChatMessage]) -> Result<String> {
        if self.should_fail || self.replies.is_empty() {
            return Err(ParleyError::Generation {
                message: "scripted responder has no reply".to_string(),
            });
        }
        let reply = self.replies[self.next % self.replies.len()].clone();
        self.next += 1;
        Ok(reply)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
