//! Sample-rate conversion and PCM format helpers.

use crate::error::{ParleyError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Frames handed to rubato per call.
const CHUNK_FRAMES: usize = 1024;

/// Mono sinc resampler between two fixed rates.
pub struct AudioResampler {
    resampler: SincFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl AudioResampler {
    /// Creates a resampler from `input_rate` to `output_rate` (Hz).
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(ParleyError::ConfigInvalidValue {
                key: "sample_rate".to_string(),
                message: "sample rates must be greater than 0".to_string(),
            });
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, 1).map_err(
            |e| ParleyError::Other(format!("Failed to create resampler: {}", e)),
        )?;

        tracing::debug!(input_rate, output_rate, "created resampler");

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
        })
    }

    /// Resamples a whole buffer.
    ///
    /// The output holds exactly `ceil(len * output_rate / input_rate)` samples.
    pub fn resample(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.resampler.input_frames_max();
        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let expected = (input.len() as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(expected + chunk_size);

        for chunk in input.chunks(chunk_size) {
            // SincFixedIn needs full chunks; the tail is zero-padded.
            let mut planar = vec![vec![0.0f32; chunk_size]];
            planar[0][..chunk.len()].copy_from_slice(chunk);

            let processed = self
                .resampler
                .process(&planar, None)
                .map_err(|e| ParleyError::Other(format!("Resampling failed: {}", e)))?;
            if let Some(channel) = processed.into_iter().next() {
                output.extend(channel);
            }
        }

        output.resize(expected, 0.0);
        self.resampler.reset();
        Ok(output)
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

/// Resamples mono f32 audio in one step. Identity when the rates match.
pub fn resample_f32(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }
    AudioResampler::new(input_rate, output_rate)?.resample(input)
}

/// Resamples mono 16-bit PCM in one step. Identity when the rates match.
pub fn resample_i16(input: &[i16], input_rate: u32, output_rate: u32) -> Result<Vec<i16>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }
    let floats = i16_to_f32(input);
    Ok(f32_to_i16(&resample_f32(&floats, input_rate, output_rate)?))
}

/// Converts float samples in [-1.0, 1.0] to 16-bit PCM, clamping out-of-range values.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Converts 16-bit PCM to floats in [-1.0, 1.0].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
}

/// Averages interleaved channels down to mono.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_rates() {
        assert!(AudioResampler::new(0, 16000).is_err());
        assert!(AudioResampler::new(16000, 0).is_err());
    }

    #[test]
    fn test_downsampling_length_is_exact() {
        let mut resampler = AudioResampler::new(24000, 16000).unwrap();
        let input: Vec<f32> = (0..2400).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();

        let output = resampler.resample(&input).unwrap();
        assert_eq!(output.len(), 1600);
    }

    #[test]
    fn test_upsampling_length_is_exact() {
        let input = vec![0.25f32; 1000];
        let output = resample_f32(&input, 16000, 48000).unwrap();
        assert_eq!(output.len(), 3000);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![1i16, -2, 3];
        assert_eq!(resample_i16(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn test_empty_input() {
        let mut resampler = AudioResampler::new(16000, 48000).unwrap();
        assert!(resampler.resample(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(&[0.0, 1.0, -1.0]), vec![0, i16::MAX, -i16::MAX]);
        assert_eq!(f32_to_i16(&[2.5, -7.0]), vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_i16_to_f32_range() {
        let floats = i16_to_f32(&[i16::MAX, 0]);
        assert!((floats[0] - 1.0).abs() < 1e-6);
        assert_eq!(floats[1], 0.0);
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[100, 200, 300, 400], 2), vec![150, 350]);
        assert_eq!(downmix(&[5, 6], 1), vec![5, 6]);
    }
}
