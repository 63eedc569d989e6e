//! Writes each reply to its own WAV file.

use crate::audio::wav::write_wav;
use crate::error::Result;
use crate::pipeline::unit::AudioPayload;
use crate::sink::AudioSink;
use std::path::{Path, PathBuf};

/// Writes each utterance to its own WAV file in a directory.
///
/// Files are named `reply-001.wav`, `reply-002.wav`, ... in completion order.
pub struct WavSink {
    directory: PathBuf,
    samples: Vec<i16>,
    sample_rate: u32,
    written: Vec<PathBuf>,
}

impl WavSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            samples: Vec::new(),
            sample_rate: 0,
            written: Vec::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl AudioSink for WavSink {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn setup(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    fn accept(&mut self, audio: &AudioPayload, is_final: bool) -> Result<()> {
        self.sample_rate = audio.sample_rate;
        self.samples.extend_from_slice(&audio.samples);
        if !is_final {
            return Ok(());
        }

        let path = self
            .directory
            .join(format!("reply-{:03}.wav", self.written.len() + 1));
        let utterance = AudioPayload::new(std::mem::take(&mut self.samples), self.sample_rate);
        write_wav(&path, &utterance)?;
        tracing::info!(
            path = %path.display(),
            duration_ms = utterance.duration_ms(),
            "wrote reply"
        );
        self.written.push(path);
        Ok(())
    }

    fn revoke(&mut self) {
        self.samples.clear();
    }

    fn shutdown(&mut self) {
        if !self.samples.is_empty() {
            tracing::warn!(
                samples = self.samples.len(),
                "discarding unfinished reply"
            );
            self.samples.clear();
        }
    }
}
