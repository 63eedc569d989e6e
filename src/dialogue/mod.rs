//! Dialogue management: conversation history and reply generation.

pub mod history;
pub mod responder;
pub mod station;

pub use history::{ChatMessage, DialogueHistory, MessageRole, SharedHistory};
pub use responder::{EchoResponder, Responder, ScriptedResponder};
pub use station::ResponderModule;
