//! Recognizer module: buffers a turn's audio and transcribes it on COMMIT.

use crate::error::ParleyError;
use crate::pipeline::buffer::TurnBuffer;
use crate::pipeline::error::ModuleError;
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use crate::pipeline::unit::IncrementalUnit;
use crate::stt::transcriber::Transcriber;
use std::sync::Arc;
use std::time::Instant;

/// Strips bracketed or starred annotations (`[BLANK_AUDIO]`, `(music)`,
/// `*coughs*`) and collapses whitespace.
///
/// An opener without a matching closer is kept as literal text.
pub fn clean_transcription(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        let close = match ch {
            '[' => ']',
            '(' => ')',
            '*' => '*',
            _ => {
                result.push(ch);
                continue;
            }
        };

        let mut inner = String::new();
        let mut found_close = false;
        while let Some(&next) = chars.peek() {
            chars.next();
            if next == close {
                found_close = true;
                break;
            }
            inner.push(next);
        }
        if !found_close {
            result.push(ch);
            result.push_str(&inner);
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turns committed audio turns into text.
///
/// Output: one text unit tagged COMMIT per committed turn. The text is empty
/// when the turn held nothing but annotations.
pub struct RecognizerModule {
    transcriber: Arc<dyn Transcriber>,
    buffer: TurnBuffer<Vec<i16>>,
}

impl RecognizerModule {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            buffer: TurnBuffer::new(),
        }
    }

    fn transcribe_turn(&self, turn: Vec<Vec<i16>>) -> Result<String, ModuleError> {
        let pcm: Vec<i16> = turn.into_iter().flatten().collect();
        let started = Instant::now();
        let raw = self.transcriber.transcribe(&pcm)?;
        let text = clean_transcription(&raw);

        tracing::info!(
            model = self.transcriber.model_name(),
            samples = pcm.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            text = %text,
            "transcribed turn"
        );

        Ok(text)
    }
}

impl Module for RecognizerModule {
    fn name(&self) -> &'static str {
        "recognizer"
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        if !self.transcriber.is_ready() {
            return Err(ModuleError::fatal(ParleyError::CapabilityUnavailable {
                capability: "speech recognition".to_string(),
                message: format!("model '{}' is not ready", self.transcriber.model_name()),
            }));
        }
        Ok(())
    }

    fn process_update(
        &mut self,
        message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        let frames = message
            .iter()
            .map(|(unit, tag)| {
                unit.as_audio()
                    .map(|audio| (audio, tag))
                    .ok_or_else(|| ModuleError::recoverable("recognizer expects audio units"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut output = UpdateMessage::default();

        for (audio, tag) in frames {
            if tag == UpdateType::Revoke {
                tracing::debug!(frames = self.buffer.len(), "turn revoked, discarding audio");
            }
            if let Some(turn) = self.buffer.apply(tag, audio.samples.clone()) {
                let text = self.transcribe_turn(turn)?;
                output.push(IncrementalUnit::text("recognizer", text), UpdateType::Commit);
            }
        }

        Ok((!output.is_empty()).then_some(output))
    }

    fn shutdown(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(frames = self.buffer.len(), "dropping unfinished turn");
        }
        self.buffer.clear();
    }
}
