//! WAV file input and output.

use crate::audio::resample::{downmix, resample_i16};
use crate::audio::source::AudioSource;
use crate::error::{ParleyError, Result};
use crate::pipeline::unit::AudioPayload;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Samples handed out per `read_samples` call (100ms at 16kHz).
const READ_CHUNK: usize = 1600;

/// Audio source that plays back a WAV file.
///
/// Accepts any sample rate and channel count; audio is downmixed to mono and
/// resampled to the requested rate on load.
pub struct WavFileSource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
}

impl WavFileSource {
    /// Opens a WAV file and converts it to mono at `sample_rate`.
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self> {
        let file = File::open(path).map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(BufReader::new(file), sample_rate)
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader<R: Read>(reader: R, sample_rate: u32) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(ParleyError::AudioFormatMismatch {
                expected: "16-bit integer PCM".to_string(),
                actual: format!("{}-bit {:?}", spec.bits_per_sample, spec.sample_format),
            });
        }

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ParleyError::AudioCapture {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let mono = downmix(&raw_samples, spec.channels as usize);
        let samples = resample_i16(&mono, spec.sample_rate, sample_rate)?;

        tracing::debug!(
            source_rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "loaded WAV input"
        );

        Ok(Self {
            samples,
            position: 0,
            sample_rate,
        })
    }

    /// Total duration of the loaded audio in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = std::cmp::min(self.position + READ_CHUNK, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Writes mono 16-bit PCM to a WAV file.
pub fn write_wav(path: &Path, audio: &AudioPayload) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in &audio.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
