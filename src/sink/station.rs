//! Sink module: hands synthesized audio to an [`AudioSink`].

use crate::pipeline::error::ModuleError;
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use crate::sink::AudioSink;

/// Module wrapper for any [`AudioSink`]. Terminal: never emits.
pub struct SinkModule {
    sink: Box<dyn AudioSink>,
    utterances: usize,
}

impl SinkModule {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            utterances: 0,
        }
    }
}

impl Module for SinkModule {
    fn name(&self) -> &'static str {
        self.sink.name()
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        self.sink.setup().map_err(ModuleError::fatal)
    }

    fn process_update(
        &mut self,
        message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        for (unit, tag) in message.iter() {
            let Some(audio) = unit.as_audio() else {
                return Err(ModuleError::recoverable("sink expects audio units"));
            };
            match tag {
                UpdateType::Add => self.sink.accept(audio, false)?,
                UpdateType::Commit => {
                    self.sink.accept(audio, true)?;
                    self.utterances += 1;
                }
                UpdateType::Revoke => self.sink.revoke(),
            }
        }
        Ok(None)
    }

    fn shutdown(&mut self) {
        tracing::debug!(sink = self.sink.name(), utterances = self.utterances, "sink closed");
        self.sink.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParleyError, Result};
    use crate::pipeline::unit::{AudioPayload, IncrementalUnit};
    use crate::sink::CollectorSink;

    fn chunk(samples: Vec<i16>, tag: UpdateType) -> UpdateMessage {
        UpdateMessage::from_iu(
            IncrementalUnit::audio("synthesizer", AudioPayload::new(samples, 24000)),
            tag,
        )
    }

    #[test]
    fn test_tags_map_to_sink_calls() {
        let collector = CollectorSink::new();
        let mut module = SinkModule::new(Box::new(collector.clone()));
        module.setup().unwrap();

        module.process_update(chunk(vec![1], UpdateType::Add)).unwrap();
        module.process_update(chunk(vec![1], UpdateType::Revoke)).unwrap();
        module.process_update(chunk(vec![2], UpdateType::Add)).unwrap();
        let out = module.process_update(chunk(vec![3], UpdateType::Commit)).unwrap();
        assert!(out.is_none());

        let collected = collector.collected();
        assert_eq!(collected.revoked, 1);
        assert_eq!(collected.utterances.len(), 1);
        assert_eq!(collected.utterances[0].samples, vec![2, 3]);
    }

    #[test]
    fn test_text_is_rejected() {
        let mut module = SinkModule::new(Box::new(CollectorSink::new()));
        let err = module
            .process_update(UpdateMessage::from_iu(
                IncrementalUnit::text("responder", "hi"),
                UpdateType::Commit,
            ))
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_setup_failure_is_fatal() {
        struct Broken;
        impl AudioSink for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn setup(&mut self) -> Result<()> {
                Err(ParleyError::AudioOutput {
                    message: "no device".to_string(),
                })
            }
            fn accept(&mut self, _audio: &AudioPayload, _is_final: bool) -> Result<()> {
                Ok(())
            }
        }

        let mut module = SinkModule::new(Box::new(Broken));
        assert_eq!(module.name(), "broken");
        assert!(module.setup().unwrap_err().is_fatal());
    }
}
