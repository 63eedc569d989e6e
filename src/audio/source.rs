use crate::error::{ParleyError, Result};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device, file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples arrived since the last call.
    ///
    /// Returns 16-bit mono PCM at [`AudioSource::sample_rate`]. An empty
    /// result means "nothing yet" for live sources and "exhausted" for finite
    /// ones.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32;

    /// Returns true for sources that end (files, in-memory buffers).
    fn is_finite(&self) -> bool {
        false
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    chunks: Vec<Vec<i16>>,
    position: usize,
    sample_rate: u32,
    finite: bool,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create an empty, finite mock source at the default sample rate.
    pub fn new() -> Self {
        Self {
            is_started: false,
            chunks: Vec::new(),
            position: 0,
            sample_rate: crate::defaults::SAMPLE_RATE,
            finite: true,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the samples returned, one chunk per `read_samples` call.
    pub fn with_chunks(mut self, chunks: Vec<Vec<i16>>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Configure the mock to return all samples in a single read.
    pub fn with_samples(self, samples: Vec<i16>) -> Self {
        self.with_chunks(vec![samples])
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Behave like a live device: never report exhaustion.
    pub fn live(mut self) -> Self {
        self.finite = false;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(ParleyError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(ParleyError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        match self.chunks.get(self.position) {
            Some(chunk) => {
                self.position += 1;
                Ok(chunk.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}

/// Cuts an arbitrary stream of samples into frames of exactly `frame_len` samples.
#[derive(Debug, Clone)]
pub struct FrameSplitter {
    frame_len: usize,
    pending: Vec<i16>,
}

impl FrameSplitter {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::new(),
        }
    }

    /// Adds samples and returns every complete frame now available.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len * self.frame_len;
        let frames = self.pending[..complete]
            .chunks_exact(self.frame_len)
            .map(<[i16]>::to_vec)
            .collect();
        self.pending.drain(..complete);
        frames
    }

    /// Returns the partial frame, zero-padded to full length, if any.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(self.frame_len, 0);
        Some(frame)
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}
