//! Audio sinks: where synthesized replies end up.

pub mod collector;
#[cfg(feature = "cpal-audio")]
pub mod speaker;
pub mod station;
pub mod wav;

use crate::error::Result;
use crate::pipeline::unit::AudioPayload;

pub use collector::{CollectedAudio, CollectorSink};
#[cfg(feature = "cpal-audio")]
pub use speaker::SpeakerSink;
pub use station::SinkModule;
pub use wav::WavSink;

/// Pluggable audio output handler for the pipeline.
///
/// Receives the chunks of one utterance in order; `is_final` marks the last
/// chunk of the utterance.
pub trait AudioSink: Send + 'static {
    /// Name for logging/debugging.
    fn name(&self) -> &'static str;

    /// Acquires the output. Must be idempotent.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn accept(&mut self, audio: &AudioPayload, is_final: bool) -> Result<()>;

    /// Drops the partial utterance received so far.
    fn revoke(&mut self) {}

    /// Called on pipeline shutdown.
    fn shutdown(&mut self) {}
}

/// Returns `primary` if it can be set up, otherwise `fallback`.
///
/// The fallback is not set up here; its setup failure surfaces when the pipeline starts.
pub fn select_sink(
    mut primary: Box<dyn AudioSink>,
    fallback: Box<dyn AudioSink>,
) -> Box<dyn AudioSink> {
    match primary.setup() {
        Ok(()) => primary,
        Err(e) => {
            tracing::warn!(
                primary = primary.name(),
                fallback = fallback.name(),
                "audio output unavailable, falling back: {}",
                e
            );
            primary.shutdown();
            fallback
        }
    }
}
