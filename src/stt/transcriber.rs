use crate::error::{ParleyError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real recognizer vs mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete utterance.
    ///
    /// # Arguments
    /// * `audio` - 16-bit mono PCM at the pipeline sample rate
    fn transcribe(&self, audio: &[i16]) -> Result<String>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across pipelines.
impl<T: Transcriber> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

#[derive(Debug)]
enum MockMode {
    /// Cycle through fixed responses, one per utterance.
    Scripted(Vec<String>),
    /// Report the utterance length.
    Describe { sample_rate: u32 },
}

/// Mock transcriber for testing and for running without a recognizer.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    mode: MockMode,
    calls: AtomicUsize,
    should_fail: bool,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            mode: MockMode::Scripted(vec!["mock transcription".to_string()]),
            calls: AtomicUsize::new(0),
            should_fail: false,
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(self, response: &str) -> Self {
        self.with_responses(&[response])
    }

    /// Configure responses returned in turn, wrapping around at the end.
    pub fn with_responses(mut self, responses: &[&str]) -> Self {
        self.mode = MockMode::Scripted(responses.iter().map(|r| r.to_string()).collect());
        self
    }

    /// Answer every utterance with a description of its length.
    pub fn describing(mut self, sample_rate: u32) -> Self {
        self.mode = MockMode::Describe { sample_rate };
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of utterances transcribed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        if self.should_fail {
            return Err(ParleyError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            MockMode::Scripted(responses) if responses.is_empty() => Ok(String::new()),
            MockMode::Scripted(responses) => Ok(responses[call % responses.len()].clone()),
            MockMode::Describe { sample_rate } => {
                let ms = audio.len() as u64 * 1000 / (*sample_rate).max(1) as u64;
                Ok(format!("I spoke for {} milliseconds", ms))
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}
