//! Per-frame speech classification.
//!
//! The turn detector asks a [`SpeechClassifier`] whether each frame contains
//! speech. The built-in classifier is RMS-based with optional automatic
//! threshold adjustment from the observed noise floor.

use crate::defaults;

/// Decides whether a single audio frame contains speech.
pub trait SpeechClassifier: Send {
    /// Classifies one frame of 16-bit mono PCM.
    fn is_speech(&mut self, samples: &[i16], sample_rate: u32) -> bool;

    /// Returns the name of this classifier for logging.
    fn name(&self) -> &'static str {
        "classifier"
    }
}

/// Number of recent levels kept for noise-floor estimation.
const LEVEL_HISTORY_MAX: usize = 100;
/// Levels needed before auto-levelling kicks in.
const LEVEL_HISTORY_MIN: usize = 10;

/// RMS energy classifier.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    threshold: f32,
    auto_level: bool,
    level_history: Vec<f32>,
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(defaults::VAD_THRESHOLD)
    }
}

impl EnergyClassifier {
    /// Creates a classifier with a fixed RMS threshold (0.0 to 1.0).
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            auto_level: false,
            level_history: Vec::new(),
        }
    }

    /// Enables or disables automatic threshold adjustment based on noise floor.
    pub fn with_auto_level(mut self, enabled: bool) -> Self {
        self.auto_level = enabled;
        self
    }

    /// Current speech threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Adjusts the threshold to twice the 25th percentile of recent levels.
    fn adjust_threshold(&mut self) {
        if self.level_history.len() < LEVEL_HISTORY_MIN {
            return;
        }

        let mut sorted = self.level_history.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let noise_floor = sorted[sorted.len() / 4];

        self.threshold = (noise_floor * 2.0).clamp(0.002, 0.2);
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn is_speech(&mut self, samples: &[i16], _sample_rate: u32) -> bool {
        if samples.is_empty() {
            return false;
        }

        let level = calculate_rms(samples);
        if self.auto_level {
            self.level_history.push(level);
            if self.level_history.len() > LEVEL_HISTORY_MAX {
                self.level_history.remove(0);
            }
            self.adjust_threshold();
        }
        level > self.threshold
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// Returns a normalized value where 0.0 is silence and 1.0 is full scale.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
