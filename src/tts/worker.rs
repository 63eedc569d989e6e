//! Synthesis worker: drains the queue of finalized replies on its own thread.

use crate::audio::resample::{AudioResampler, f32_to_i16};
use crate::error::Result;
use crate::pipeline::error::ModuleError;
use crate::pipeline::graph::{Emitter, InFlight};
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::unit::{AudioPayload, IncrementalUnit};
use crate::tts::synthesizer::Synthesizer;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A finalized reply waiting to be spoken, with the work it keeps in flight.
pub type WorkItem = (String, InFlight);

/// Synthesizes queued text and emits every chunk as it is produced.
///
/// All chunks of an item but the last are emitted as ADD, the last as COMMIT,
/// so items never interleave. The stop flag is checked between items only.
pub struct SynthesisWorker {
    synthesizer: Box<dyn Synthesizer>,
    queue: Receiver<WorkItem>,
    emitter: Emitter,
    running: Arc<AtomicBool>,
    resampler: Option<AudioResampler>,
    output_rate: u32,
    poll_interval: Duration,
}

impl SynthesisWorker {
    pub fn new(
        synthesizer: Box<dyn Synthesizer>,
        queue: Receiver<WorkItem>,
        emitter: Emitter,
        running: Arc<AtomicBool>,
        output_rate: u32,
    ) -> Result<Self> {
        let input_rate = synthesizer.sample_rate();
        let resampler = if input_rate == output_rate {
            None
        } else {
            Some(AudioResampler::new(input_rate, output_rate)?)
        };

        Ok(Self {
            synthesizer,
            queue,
            emitter,
            running,
            resampler,
            output_rate,
            poll_interval: Duration::from_millis(crate::defaults::WORKER_POLL_MS),
        })
    }

    /// Sets how long the worker blocks on the queue before rechecking the stop flag.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("parley-synthesis".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        tracing::debug!(synthesizer = self.synthesizer.name(), "synthesis worker started");

        while self.running.load(Ordering::SeqCst) {
            let (text, _work) = match self.queue.recv_timeout(self.poll_interval) {
                Ok(item) => item,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let started = Instant::now();
            match self.speak(&text) {
                Ok(0) => {
                    tracing::warn!(stage = "synthesizer", text = %text, "synthesis produced no audio");
                }
                Ok(chunks) => {
                    tracing::debug!(
                        chunks,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "synthesized reply"
                    );
                }
                Err(e) => self.emitter.report(&ModuleError::from(e)),
            }
        }

        tracing::debug!("synthesis worker stopped");
    }

    /// Synthesizes one item. Returns the number of chunks emitted.
    fn speak(&mut self, text: &str) -> Result<usize> {
        let mut chunks = self.synthesizer.synthesize(text)?.peekable();
        let mut last: Option<Arc<IncrementalUnit>> = None;
        let mut emitted = 0;

        while let Some(chunk) = chunks.next() {
            let samples = match chunk.and_then(|chunk| self.convert(&chunk)) {
                Ok(samples) => samples,
                Err(e) => {
                    // Take back the partial reply already sent downstream.
                    if let Some(unit) = last.take() {
                        self.emitter
                            .emit(UpdateMessage::from_iu(unit, UpdateType::Revoke));
                    }
                    return Err(e);
                }
            };

            let tag = if chunks.peek().is_some() {
                UpdateType::Add
            } else {
                UpdateType::Commit
            };
            let unit =
                IncrementalUnit::audio("synthesizer", AudioPayload::new(samples, self.output_rate));
            self.emitter
                .emit(UpdateMessage::from_iu(unit.clone(), tag));
            last = Some(unit);
            emitted += 1;
        }

        Ok(emitted)
    }

    fn convert(&mut self, chunk: &[f32]) -> Result<Vec<i16>> {
        match self.resampler.as_mut() {
            Some(resampler) => Ok(f32_to_i16(&resampler.resample(chunk)?)),
            None => Ok(f32_to_i16(chunk)),
        }
    }
}
