use crate::defaults;
use crate::error::{ParleyError, Result};
use std::f32::consts::PI;

/// Synthesized audio, produced lazily one chunk at a time.
///
/// Consumed once. Each chunk is mono f32 at the synthesizer's sample rate.
pub type ChunkIter = Box<dyn Iterator<Item = Result<Vec<f32>>> + Send>;

/// Turns text into a stream of audio chunks.
pub trait Synthesizer: Send {
    fn synthesize(&mut self, text: &str) -> Result<ChunkIter>;

    /// Sample rate of the produced chunks in Hz.
    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str {
        "synthesizer"
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Deterministic stand-in that renders every word as a short tone.
///
/// The pitch depends on the word length, so different replies sound
/// different while staying reproducible.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
    word_ms: u32,
    should_fail: bool,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new(defaults::TTS_SAMPLE_RATE)
    }
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            word_ms: 120,
            should_fail: false,
        }
    }

    /// Sets the length of each word's tone.
    pub fn with_word_ms(mut self, word_ms: u32) -> Self {
        self.word_ms = word_ms;
        self
    }

    /// Configure the synthesizer to fail on every request
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Samples in the chunk rendered for one word.
    pub fn samples_per_word(&self) -> usize {
        (self.sample_rate as u64 * self.word_ms as u64 / 1000) as usize
    }
}

fn tone(frequency: f32, len: usize, sample_rate: u32) -> Vec<f32> {
    let fade = (len / 10).max(1);
    (0..len)
        .map(|i| {
            let envelope = (i.min(len - 1 - i) as f32 / fade as f32).min(1.0);
            0.3 * envelope * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin()
        })
        .collect()
}

impl Synthesizer for ToneSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<ChunkIter> {
        if self.should_fail {
            return Err(ParleyError::Synthesis {
                message: "tone synthesizer configured to fail".to_string(),
            });
        }

        let words: Vec<usize> = text.split_whitespace().map(|w| w.chars().count()).collect();
        let len = self.samples_per_word();
        let sample_rate = self.sample_rate;

        Ok(Box::new(words.into_iter().map(move |chars| {
            let frequency = 220.0 + 40.0 * (chars % 8) as f32;
            Ok(tone(frequency, len, sample_rate))
        })))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "tone"
    }
}
