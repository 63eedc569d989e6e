//! Source module: turns an [`AudioSource`] into a stream of audio frames.

use crate::audio::source::{AudioSource, FrameSplitter};
use crate::defaults;
use crate::pipeline::error::ModuleError;
use crate::pipeline::graph::{Emitter, InFlight};
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use crate::pipeline::unit::{AudioPayload, IncrementalUnit};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Consecutive read failures tolerated before capture gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Polls an audio source on its own thread and emits one ADD per frame.
///
/// Frames are exactly `frame_ms` long. Finite sources get their last partial
/// frame zero-padded, followed by trailing silence so a turn still open at the
/// end of the input can close.
pub struct SourceModule {
    source: Option<Box<dyn AudioSource>>,
    started: bool,
    frame_ms: u32,
    trailing_silence_ms: u32,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SourceModule {
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            source: Some(source),
            started: false,
            frame_ms: defaults::FRAME_MS,
            trailing_silence_ms: defaults::TRAILING_SILENCE_MS,
            poll_interval: Duration::from_millis(16),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Sets the frame length in milliseconds.
    pub fn with_frame_ms(mut self, frame_ms: u32) -> Self {
        self.frame_ms = frame_ms;
        self
    }

    /// Sets the silence appended after a finite source is exhausted.
    pub fn with_trailing_silence_ms(mut self, ms: u32) -> Self {
        self.trailing_silence_ms = ms;
        self
    }
}

fn emit_frame(emitter: &Emitter, samples: Vec<i16>, sample_rate: u32) {
    let unit = IncrementalUnit::audio("source", AudioPayload::new(samples, sample_rate));
    emitter.emit(UpdateMessage::from_iu(unit, UpdateType::Add));
}

struct CaptureLoop {
    source: Box<dyn AudioSource>,
    emitter: Emitter,
    // Keeps the pipeline busy until the source is drained.
    _work: InFlight,
    running: Arc<AtomicBool>,
    splitter: FrameSplitter,
    trailing_frames: u32,
    poll_interval: Duration,
}

impl CaptureLoop {
    fn run(mut self) {
        let sample_rate = self.source.sample_rate();
        let finite = self.source.is_finite();
        let mut consecutive_errors = 0u32;
        let mut frames_sent = 0u64;

        while self.running.load(Ordering::SeqCst) {
            let samples = match self.source.read_samples() {
                Ok(samples) => {
                    consecutive_errors = 0;
                    samples
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        tracing::error!(
                            errors = consecutive_errors,
                            "audio capture failed repeatedly: {}",
                            e
                        );
                        break;
                    }
                    thread::sleep(self.poll_interval);
                    continue;
                }
            };

            if samples.is_empty() {
                if finite {
                    break;
                }
                thread::sleep(self.poll_interval);
                continue;
            }

            for frame in self.splitter.push(&samples) {
                emit_frame(&self.emitter, frame, sample_rate);
                frames_sent += 1;
            }
        }

        if finite && self.running.load(Ordering::SeqCst) {
            if let Some(frame) = self.splitter.flush() {
                emit_frame(&self.emitter, frame, sample_rate);
                frames_sent += 1;
            }
            let silence = vec![0i16; self.splitter.frame_len()];
            for _ in 0..self.trailing_frames {
                emit_frame(&self.emitter, silence.clone(), sample_rate);
            }
            tracing::info!(frames = frames_sent, "audio input exhausted");
        }

        if frames_sent == 0 && !finite {
            tracing::warn!("no audio frames captured; check that the microphone is connected");
        }

        if let Err(e) = self.source.stop() {
            tracing::warn!("failed to stop audio capture: {}", e);
        }
    }
}

impl Module for SourceModule {
    fn name(&self) -> &'static str {
        "source"
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        if self.started {
            return Ok(());
        }
        if self.frame_ms == 0 {
            return Err(ModuleError::fatal("frame length must be greater than 0"));
        }
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| ModuleError::fatal("audio source already consumed"))?;
        source.start().map_err(ModuleError::fatal)?;
        self.started = true;
        Ok(())
    }

    fn prepare_run(&mut self, emitter: &Emitter) -> Result<(), ModuleError> {
        let source = self
            .source
            .take()
            .ok_or_else(|| ModuleError::fatal("audio source already consumed"))?;

        let frame_len = (source.sample_rate() as u64 * self.frame_ms as u64 / 1000) as usize;
        let capture = CaptureLoop {
            source,
            emitter: emitter.clone(),
            _work: emitter.hold(),
            running: self.running.clone(),
            splitter: FrameSplitter::new(frame_len),
            trailing_frames: self.trailing_silence_ms / self.frame_ms,
            poll_interval: self.poll_interval,
        };

        self.running.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("parley-capture".to_string())
            .spawn(move || capture.run())
            .map_err(|e| ModuleError::fatal(format!("failed to spawn capture thread: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn process_update(
        &mut self,
        _message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        // Sources have no upstream.
        Ok(None)
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        } else if self.started
            && let Some(source) = self.source.as_mut()
            && let Err(e) = source.stop()
        {
            tracing::warn!("failed to stop audio capture: {}", e);
        }
    }
}
