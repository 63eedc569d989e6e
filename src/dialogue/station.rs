//! Responder module: answers each finalized user turn.

use crate::dialogue::history::{DialogueHistory, SharedHistory};
use crate::dialogue::responder::Responder;
use crate::error::ParleyError;
use crate::pipeline::buffer::TurnBuffer;
use crate::pipeline::error::ModuleError;
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use crate::pipeline::unit::IncrementalUnit;
use std::sync::MutexGuard;
use std::time::Instant;

/// Buffers user text until COMMIT, appends it to the history and emits the
/// generated reply as a single COMMIT.
///
/// If generation fails the user turn is rolled back so the history keeps
/// alternating between user and assistant.
pub struct ResponderModule {
    responder: Box<dyn Responder>,
    history: SharedHistory,
    buffer: TurnBuffer<String>,
}

impl ResponderModule {
    pub fn new(responder: Box<dyn Responder>, history: SharedHistory) -> Self {
        Self {
            responder,
            history,
            buffer: TurnBuffer::new(),
        }
    }

    /// Shared handle to the conversation history.
    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    fn lock_history(&self) -> Result<MutexGuard<'_, DialogueHistory>, ModuleError> {
        self.history
            .lock()
            .map_err(|_| ModuleError::fatal("dialogue history lock poisoned"))
    }

    fn answer(&mut self, user_text: String) -> Result<String, ModuleError> {
        let messages = {
            let mut history = self.lock_history()?;
            history.push_user(user_text);
            history.messages()
        };

        let started = Instant::now();
        let reply = self
            .responder
            .generate(&messages)
            .map(|reply| reply.trim().to_string())
            .and_then(|reply| {
                if reply.is_empty() {
                    Err(ParleyError::Generation {
                        message: "empty reply".to_string(),
                    })
                } else {
                    Ok(reply)
                }
            });

        let mut history = self.lock_history()?;
        match reply {
            Ok(reply) => {
                tracing::info!(
                    responder = self.responder.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    reply = %reply,
                    "generated reply"
                );
                history.push_assistant(reply.clone());
                Ok(reply)
            }
            Err(e) => {
                history.rollback_user();
                Err(e.into())
            }
        }
    }
}

impl Module for ResponderModule {
    fn name(&self) -> &'static str {
        "responder"
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        if !self.responder.is_ready() {
            return Err(ModuleError::fatal(ParleyError::CapabilityUnavailable {
                capability: "response generation".to_string(),
                message: format!("'{}' is not ready", self.responder.name()),
            }));
        }
        Ok(())
    }

    fn process_update(
        &mut self,
        message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        // The history must not change for a message that gets rejected.
        let texts = message
            .iter()
            .map(|(unit, tag)| {
                unit.as_text()
                    .map(|text| (text, tag))
                    .ok_or_else(|| ModuleError::recoverable("responder expects text units"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut output = UpdateMessage::default();

        for (text, tag) in texts {
            let Some(turn) = self.buffer.apply(tag, text.to_string()) else {
                continue;
            };

            let user_text = turn.join(" ").trim().to_string();
            if user_text.is_empty() {
                tracing::debug!("skipping empty user turn");
                continue;
            }

            let reply = self.answer(user_text)?;
            output.push(IncrementalUnit::text("responder", reply), UpdateType::Commit);
        }

        Ok((!output.is_empty()).then_some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::history::MessageRole;
    use crate::dialogue::responder::{EchoResponder, ScriptedResponder};

    fn user(text: &str, tag: UpdateType) -> UpdateMessage {
        UpdateMessage::from_iu(IncrementalUnit::text("recognizer", text), tag)
    }

    #[test]
    fn test_commit_generates_reply_and_records_history() {
        let history = DialogueHistory::new("prompt").shared();
        let mut module = ResponderModule::new(Box::new(EchoResponder), history.clone());

        let out = module
            .process_update(user("hello there", UpdateType::Commit))
            .unwrap()
            .unwrap();
        let (unit, tag) = out.iter().next().unwrap();
        assert_eq!(tag, UpdateType::Commit);
        assert_eq!(unit.as_text(), Some("You said: hello there"));

        let history = history.lock().unwrap();
        let roles: Vec<_> = history.turns().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
    }

    #[test]
    fn test_partial_text_is_joined_on_commit() {
        let history = DialogueHistory::new("prompt").shared();
        let mut module = ResponderModule::new(Box::new(EchoResponder), history);

        assert!(
            module
                .process_update(user("how", UpdateType::Add))
                .unwrap()
                .is_none()
        );
        let out = module
            .process_update(user("are you", UpdateType::Commit))
            .unwrap()
            .unwrap();
        assert_eq!(
            out.iter().next().unwrap().0.as_text(),
            Some("You said: how are you")
        );
    }

    #[test]
    fn test_revoked_text_is_never_answered() {
        let history = DialogueHistory::new("prompt").shared();
        let mut module = ResponderModule::new(Box::new(EchoResponder), history.clone());

        module.process_update(user("noise", UpdateType::Add)).unwrap();
        module
            .process_update(user("noise", UpdateType::Revoke))
            .unwrap();
        assert!(history.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_generation_rolls_back_user_turn() {
        let history = DialogueHistory::new("prompt").shared();
        let responder = ScriptedResponder::new(&["unused"]).with_failure();
        let mut module = ResponderModule::new(Box::new(responder), history.clone());

        let err = module
            .process_update(user("hello", UpdateType::Commit))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(history.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_reply_is_an_error() {
        let history = DialogueHistory::new("prompt").shared();
        let mut module =
            ResponderModule::new(Box::new(ScriptedResponder::new(&["   "])), history.clone());

        assert!(
            module
                .process_update(user("hello", UpdateType::Commit))
                .is_err()
        );
        assert!(history.lock().unwrap().is_empty());
    }

    #[test]
    fn test_blank_user_turn_is_skipped() {
        let history = DialogueHistory::new("prompt").shared();
        let mut module = ResponderModule::new(Box::new(EchoResponder), history.clone());

        assert!(
            module
                .process_update(user("  ", UpdateType::Commit))
                .unwrap()
                .is_none()
        );
        assert!(history.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mixed_payload_message_leaves_history_untouched() {
        let history = DialogueHistory::new("prompt").shared();
        let mut module = ResponderModule::new(Box::new(EchoResponder), history.clone());

        let frame = IncrementalUnit::audio(
            "turn",
            crate::pipeline::unit::AudioPayload::new(vec![0; 4], 16000),
        );
        let mixed = UpdateMessage::from_pairs(vec![
            (IncrementalUnit::text("recognizer", "hello"), UpdateType::Commit),
            (frame, UpdateType::Add),
        ]);
        let err = module.process_update(mixed).unwrap_err();
        assert!(!err.is_fatal());
        assert!(history.lock().unwrap().is_empty());

        let out = module
            .process_update(user("again", UpdateType::Commit))
            .unwrap()
            .unwrap();
        assert_eq!(out.iter().next().unwrap().0.as_text(), Some("You said: again"));
        assert_eq!(history.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_responder_sees_system_prompt_first() {
        struct Inspect;
        impl Responder for Inspect {
            fn generate(
                &mut self,
                history: &[crate::dialogue::history::ChatMessage],
            ) -> crate::error::Result<String> {
                assert_eq!(history[0].role, MessageRole::System);
                assert_eq!(history[0].content, "be kind");
                Ok(format!("{} messages", history.len()))
            }
        }

        let history = DialogueHistory::new("be kind").shared();
        let mut module = ResponderModule::new(Box::new(Inspect), history);
        let out = module
            .process_update(user("hi", UpdateType::Commit))
            .unwrap()
            .unwrap();
        assert_eq!(out.iter().next().unwrap().0.as_text(), Some("2 messages"));
    }
}
