//! Speaker output using CPAL.

use crate::audio::capture::SendableStream;
use crate::error::{ParleyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lists output devices by name.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| ParleyError::AudioOutput {
            message: format!("Failed to enumerate output devices: {}", e),
        })?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Samples waiting for the output callback, oldest first.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    samples: VecDeque<f32>,
}

impl PlaybackQueue {
    pub fn push(&mut self, samples: &[f32]) {
        self.samples.extend(samples.iter().copied());
    }

    /// Next sample to play, silence when empty.
    pub fn pop(&mut self) -> f32 {
        self.samples.pop_front().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops up to `count` of the most recently queued samples.
    ///
    /// Samples already handed to the device are gone, so fewer may be
    /// dropped. Returns how many were.
    pub fn discard_latest(&mut self, count: usize) -> usize {
        let keep = self.samples.len().saturating_sub(count);
        let dropped = self.samples.len() - keep;
        self.samples.truncate(keep);
        dropped
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// A playback stream fed from an in-memory queue.
///
/// Samples are mono f32; every output channel gets the same sample. The
/// stream plays silence while the queue is empty.
pub struct SpeakerOutput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<SendableStream>,
    queue: Arc<Mutex<PlaybackQueue>>,
}

impl SpeakerOutput {
    /// Opens `device_name`, or the default output device when `None`.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| ParleyError::AudioOutput {
                    message: format!("Failed to enumerate output devices: {}", e),
                })?
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| ParleyError::AudioDeviceNotFound {
                    device: name.to_string(),
                })?,
            None => host
                .default_output_device()
                .ok_or_else(|| ParleyError::AudioDeviceNotFound {
                    device: "default output".to_string(),
                })?,
        };

        let config: cpal::StreamConfig = device
            .default_output_config()
            .map_err(|e| ParleyError::AudioOutput {
                message: format!("Failed to get output config: {}", e),
            })?
            .into();

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            rate = config.sample_rate.0,
            channels = config.channels,
            "using output device"
        );

        Ok(Self {
            device,
            config,
            stream: None,
            queue: Arc::new(Mutex::new(PlaybackQueue::default())),
        })
    }

    /// Sample rate the device plays at.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Builds and starts the output stream. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = self.config.channels as usize;
        let queue = Arc::clone(&self.queue);
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = queue.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels.max(1)) {
                        let sample = queue.pop();
                        frame.fill(sample);
                    }
                },
                |err| tracing::error!("audio output stream error: {}", err),
                None,
            )
            .map_err(|e| ParleyError::AudioOutput {
                message: format!("Failed to build output stream: {}", e),
            })?;

        stream.play().map_err(|e| ParleyError::AudioOutput {
            message: format!("Failed to start output stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    /// Queues samples for playback.
    pub fn play(&self, samples: &[f32]) -> Result<()> {
        let mut queue = self.queue.lock().map_err(|e| ParleyError::AudioOutput {
            message: format!("Failed to lock playback queue: {}", e),
        })?;
        queue.push(samples);
        Ok(())
    }

    /// Samples still waiting to be played.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Drops up to `count` of the latest queued samples. Returns how many were dropped.
    pub fn discard_latest(&self, count: usize) -> usize {
        self.queue
            .lock()
            .map(|mut queue| queue.discard_latest(count))
            .unwrap_or(0)
    }

    /// Stops the stream, discarding anything not yet played.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            tracing::warn!("failed to pause output stream: {}", e);
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
