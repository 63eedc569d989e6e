//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::resample::{downmix, f32_to_i16, resample_i16};
use crate::audio::source::AudioSource;
use crate::error::{ParleyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for voice input.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Lists usable input devices; preferred ones are marked "\[recommended\]".
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to enumerate input devices: {}", e),
        })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Picks an input device by exact name, or the best default.
fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let devices = host
            .input_devices()
            .map_err(|e| ParleyError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
            })?;
        for device in devices {
            if let Ok(dev_name) = device.name()
                && dev_name == name
            {
                return Ok(device);
            }
        }
        return Err(ParleyError::AudioDeviceNotFound {
            device: name.to_string(),
        });
    }

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name()
                && is_preferred_device(&name)
            {
                return Ok(device);
            }
        }
    }

    host.default_input_device()
        .ok_or_else(|| ParleyError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through a Mutex, one thread at a time.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Live microphone capture, delivering mono i16 at the configured rate.
///
/// Tries i16 then f32 at the target rate and mono; if the device rejects both,
/// captures at its native format and converts in software.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Opens `device_name`, or the best default input device when `None`.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_input_device(device_name)?;
        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            "using input device"
        );

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::error!("audio input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(f32_to_i16(data));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Captures at the device's default config and converts in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| ParleyError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let err_callback = |err| {
            tracing::error!("audio input stream error: {}", err);
        };
        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let convert = move |samples: &[i16]| {
            let mono = downmix(samples, native_channels);
            match resample_i16(&mono, native_rate, target_rate) {
                Ok(converted) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                }
                Err(e) => tracing::warn!("dropping input block: {}", e),
            }
        };

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        convert(data);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| ParleyError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        convert(&f32_to_i16(data));
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| ParleyError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            fmt => Err(ParleyError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. Try another device.",
                    fmt
                ),
            }),
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        {
            let guard = self.stream.lock().map_err(|e| ParleyError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if guard.is_some() {
                return Ok(());
            }
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native = self.build_stream_native()?;
            native.play().map_err(|e| ParleyError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        let mut guard = self.stream.lock().map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if let Some(stream) = guard.take() {
            stream.0.pause().map_err(|e| ParleyError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| ParleyError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("default"));
        assert!(!should_filter_device("USB Microphone"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PulseAudio Sound Server"));
        assert!(!is_preferred_device("hw:CARD=PCH"));
    }

    #[test]
    fn test_unknown_device_name_is_rejected() {
        let result = CpalAudioSource::new(Some("no-such-device-xyz"), 16000);
        assert!(result.is_err());
    }
}
