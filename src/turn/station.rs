//! Turn detector module: classifies audio frames and marks turn boundaries.

use crate::audio::vad::SpeechClassifier;
use crate::pipeline::error::ModuleError;
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use crate::pipeline::unit::IncrementalUnit;
use crate::turn::detector::{TurnConfig, TurnDetector};
use std::sync::Arc;

/// Wraps a [`TurnDetector`] and a [`SpeechClassifier`] as a pipeline module.
///
/// Input: audio frames (any tag). Output: the frames of each turn as ADDs,
/// closed by a COMMIT carrying the final frame, or by a REVOKE that names the
/// last frame added when the turn was too short.
pub struct TurnDetectorModule {
    detector: TurnDetector,
    classifier: Box<dyn SpeechClassifier>,
    last_added: Option<Arc<IncrementalUnit>>,
}

impl TurnDetectorModule {
    pub fn new(config: TurnConfig, classifier: Box<dyn SpeechClassifier>) -> Self {
        Self {
            detector: TurnDetector::new(config),
            classifier,
            last_added: None,
        }
    }

    pub fn detector(&self) -> &TurnDetector {
        &self.detector
    }
}

impl Module for TurnDetectorModule {
    fn name(&self) -> &'static str {
        "turn"
    }

    fn process_update(
        &mut self,
        message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        // Reject the whole message before the detector moves.
        let frames = message
            .iter()
            .map(|(unit, _)| {
                unit.as_audio().ok_or_else(|| {
                    ModuleError::recoverable(format!(
                        "expected audio, got a text unit from '{}'",
                        unit.creator()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut output = UpdateMessage::default();

        for audio in frames {
            let is_speech = self
                .classifier
                .is_speech(&audio.samples, audio.sample_rate);

            match self.detector.step(is_speech) {
                None => {}
                Some(UpdateType::Add) => {
                    let frame = IncrementalUnit::audio("turn", audio.clone());
                    self.last_added = Some(frame.clone());
                    output.push(frame, UpdateType::Add);
                }
                Some(UpdateType::Commit) => {
                    self.last_added = None;
                    output.push(
                        IncrementalUnit::audio("turn", audio.clone()),
                        UpdateType::Commit,
                    );
                }
                Some(UpdateType::Revoke) => match self.last_added.take() {
                    Some(last) => output.push(last, UpdateType::Revoke),
                    None => tracing::warn!("turn revoked before any frame was added"),
                },
            }
        }

        Ok((!output.is_empty()).then_some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::EnergyClassifier;
    use crate::pipeline::unit::AudioPayload;
    use crate::turn::detector::TurnState;

    fn frame(speech: bool) -> UpdateMessage {
        let level = if speech { 8000 } else { 0 };
        let unit = IncrementalUnit::audio("source", AudioPayload::new(vec![level; 320], 16000));
        UpdateMessage::from_iu(unit, UpdateType::Add)
    }

    fn module() -> TurnDetectorModule {
        TurnDetectorModule::new(
            TurnConfig::default(),
            Box::new(EnergyClassifier::new(0.02)),
        )
    }

    fn drive(module: &mut TurnDetectorModule, speech: usize, silence: usize) -> Vec<UpdateMessage> {
        let frames = std::iter::repeat_n(true, speech).chain(std::iter::repeat_n(false, silence));
        frames
            .filter_map(|s| module.process_update(frame(s)).unwrap())
            .collect()
    }

    #[test]
    fn test_silence_produces_no_output() {
        let mut module = module();
        assert!(drive(&mut module, 0, 20).is_empty());
    }

    #[test]
    fn test_commit_carries_final_frame() {
        let mut module = module();
        let out = drive(&mut module, 10, 36);

        assert_eq!(out.len(), 46);
        let (last, tag) = out[45].iter().next().unwrap();
        assert_eq!(tag, UpdateType::Commit);
        assert_eq!(last.creator(), "turn");
        assert_eq!(last.as_audio().unwrap().nframes(), 320);
    }

    #[test]
    fn test_revoke_names_last_added_frame() {
        let mut module = module();
        let out = drive(&mut module, 5, 36);

        assert_eq!(out.len(), 41);
        let (last_add, _) = out[39].iter().next().unwrap();
        let (revoked, tag) = out[40].iter().next().unwrap();
        assert_eq!(tag, UpdateType::Revoke);
        assert_eq!(revoked.id(), last_add.id());
    }

    #[test]
    fn test_text_input_is_rejected() {
        let mut module = module();
        let message = UpdateMessage::from_iu(IncrementalUnit::text("asr", "hi"), UpdateType::Add);
        let err = module.process_update(message).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_batched_frames_in_one_message() {
        let mut module = module();
        let mut batch = UpdateMessage::default();
        for _ in 0..3 {
            let unit =
                IncrementalUnit::audio("source", AudioPayload::new(vec![8000; 320], 16000));
            batch.push(unit, UpdateType::Add);
        }

        let out = module.process_update(batch).unwrap().unwrap();
        assert_eq!(out.update_types(), vec![UpdateType::Add; 3]);
    }

    #[test]
    fn test_mixed_payload_message_leaves_turn_open() {
        let mut module = module();
        drive(&mut module, 10, 35);
        let speech_before = module.detector().speech_length();

        let silence = IncrementalUnit::audio("source", AudioPayload::new(vec![0; 320], 16000));
        let mixed = UpdateMessage::from_pairs(vec![
            (silence, UpdateType::Add),
            (IncrementalUnit::text("asr", "hi"), UpdateType::Add),
        ]);
        assert!(module.process_update(mixed).is_err());
        assert_eq!(module.detector().state(), TurnState::SilenceTurn);
        assert_eq!(module.detector().speech_length(), speech_before);

        // The closing frame still arrives as a COMMIT.
        let out = drive(&mut module, 0, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].update_types(), vec![UpdateType::Commit]);
    }
}
