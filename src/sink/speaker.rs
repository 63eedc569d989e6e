//! Speaker output for replies.

use crate::audio::playback::SpeakerOutput;
use crate::audio::resample::{AudioResampler, i16_to_f32};
use crate::error::Result;
use crate::pipeline::unit::AudioPayload;
use crate::sink::AudioSink;
use std::time::{Duration, Instant};

/// Longest wait for queued audio to finish playing on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Plays replies through an output device.
pub struct SpeakerSink {
    device: Option<String>,
    output: Option<SpeakerOutput>,
    resampler: Option<AudioResampler>,
    /// Samples queued for the utterance still in progress.
    partial: usize,
}

impl SpeakerSink {
    /// Plays on `device`, or the default output device when `None`.
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            output: None,
            resampler: None,
            partial: 0,
        }
    }

    fn to_device_rate(&mut self, audio: &AudioPayload, device_rate: u32) -> Result<Vec<f32>> {
        let samples = i16_to_f32(&audio.samples);
        if audio.sample_rate == device_rate {
            return Ok(samples);
        }
        let stale = self
            .resampler
            .as_ref()
            .is_none_or(|r| r.input_rate() != audio.sample_rate);
        if stale {
            self.resampler = Some(AudioResampler::new(audio.sample_rate, device_rate)?);
        }
        match self.resampler.as_mut() {
            Some(resampler) => resampler.resample(&samples),
            None => Ok(samples),
        }
    }
}

impl AudioSink for SpeakerSink {
    fn name(&self) -> &'static str {
        "speaker"
    }

    fn setup(&mut self) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }
        let mut output = SpeakerOutput::open(self.device.as_deref())?;
        output.start()?;
        self.output = Some(output);
        Ok(())
    }

    fn accept(&mut self, audio: &AudioPayload, is_final: bool) -> Result<()> {
        self.setup()?;
        let device_rate = match self.output.as_ref() {
            Some(output) => output.sample_rate(),
            None => return Ok(()),
        };
        let samples = self.to_device_rate(audio, device_rate)?;
        if let Some(output) = self.output.as_ref() {
            output.play(&samples)?;
        }
        self.partial = if is_final {
            0
        } else {
            self.partial + samples.len()
        };
        Ok(())
    }

    fn revoke(&mut self) {
        let queued = std::mem::take(&mut self.partial);
        if let Some(output) = self.output.as_ref() {
            let dropped = output.discard_latest(queued);
            tracing::debug!(queued, dropped, "reply revoked, dropped unplayed audio");
        }
    }

    fn shutdown(&mut self) {
        let Some(mut output) = self.output.take() else {
            return;
        };
        let started = Instant::now();
        while output.pending() > 0 && started.elapsed() < DRAIN_TIMEOUT {
            std::thread::sleep(Duration::from_millis(20));
        }
        output.stop();
    }
}
