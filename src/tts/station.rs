//! Synthesis module: hands finalized replies to the synthesis worker.

use crate::defaults;
use crate::error::ParleyError;
use crate::pipeline::error::ModuleError;
use crate::pipeline::graph::Emitter;
use crate::pipeline::message::{UpdateMessage, UpdateType};
use crate::pipeline::module::Module;
use crate::tts::synthesizer::Synthesizer;
use crate::tts::worker::{SynthesisWorker, WorkItem};
use crossbeam_channel::{Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Queues every committed text for synthesis and returns immediately.
///
/// Audio reaches subscribers from the worker thread, so `process_update`
/// never produces output itself.
pub struct SynthesisModule {
    synthesizer: Option<Box<dyn Synthesizer>>,
    output_rate: u32,
    queue_capacity: usize,
    queue: Option<Sender<WorkItem>>,
    emitter: Option<Emitter>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SynthesisModule {
    /// Creates a module that emits audio at the synthesizer's own rate.
    pub fn new(synthesizer: Box<dyn Synthesizer>) -> Self {
        let output_rate = synthesizer.sample_rate();
        Self {
            synthesizer: Some(synthesizer),
            output_rate,
            queue_capacity: defaults::TTS_QUEUE_CAPACITY,
            queue: None,
            emitter: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Resample synthesized audio to `rate` Hz before emitting it.
    pub fn with_output_rate(mut self, rate: u32) -> Self {
        self.output_rate = rate;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Replies waiting for the worker.
    pub fn queued(&self) -> usize {
        self.queue.as_ref().map(|queue| queue.len()).unwrap_or(0)
    }
}

impl Module for SynthesisModule {
    fn name(&self) -> &'static str {
        "synthesizer"
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        let synthesizer = self
            .synthesizer
            .as_ref()
            .ok_or_else(|| ModuleError::fatal("synthesizer already running"))?;
        if !synthesizer.is_ready() {
            return Err(ModuleError::fatal(ParleyError::CapabilityUnavailable {
                capability: "speech synthesis".to_string(),
                message: format!("'{}' is not ready", synthesizer.name()),
            }));
        }
        if self.queue_capacity == 0 {
            return Err(ModuleError::fatal("synthesis queue capacity must be greater than 0"));
        }
        if self.output_rate == 0 {
            return Err(ModuleError::fatal("output sample rate must be greater than 0"));
        }
        Ok(())
    }

    fn prepare_run(&mut self, emitter: &Emitter) -> Result<(), ModuleError> {
        let synthesizer = self
            .synthesizer
            .take()
            .ok_or_else(|| ModuleError::fatal("synthesizer already running"))?;

        let (tx, rx) = bounded(self.queue_capacity);
        self.running.store(true, Ordering::SeqCst);
        let worker = SynthesisWorker::new(
            synthesizer,
            rx,
            emitter.clone(),
            self.running.clone(),
            self.output_rate,
        )
        .map_err(ModuleError::fatal)?;
        let handle = worker
            .spawn()
            .map_err(|e| ModuleError::fatal(format!("failed to spawn synthesis worker: {}", e)))?;

        self.queue = Some(tx);
        self.emitter = Some(emitter.clone());
        self.handle = Some(handle);
        Ok(())
    }

    fn process_update(
        &mut self,
        message: UpdateMessage,
    ) -> Result<Option<UpdateMessage>, ModuleError> {
        let (Some(queue), Some(emitter)) = (self.queue.as_ref(), self.emitter.as_ref()) else {
            return Err(ModuleError::recoverable("synthesis worker is not running"));
        };

        for (unit, tag) in message.iter() {
            let Some(text) = unit.as_text() else {
                return Err(ModuleError::recoverable("synthesizer expects text units"));
            };
            if tag != UpdateType::Commit {
                continue;
            }
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match queue.try_send((text.to_string(), emitter.hold())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    return Err(ModuleError::recoverable(
                        "synthesis queue is full, dropping reply",
                    ));
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(ModuleError::fatal("synthesis worker has exited"));
                }
            }
        }

        Ok(None)
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue = None;
        self.emitter = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("synthesis worker panicked");
        }
    }
}
