//! In-memory sink that keeps every reply.

use crate::error::Result;
use crate::pipeline::unit::AudioPayload;
use crate::sink::AudioSink;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Everything a [`CollectorSink`] has received.
#[derive(Debug, Default, Clone)]
pub struct CollectedAudio {
    /// Every chunk, in arrival order.
    pub chunks: Vec<AudioPayload>,
    /// Completed utterances, each the concatenation of its chunks.
    pub utterances: Vec<AudioPayload>,
    /// Partial utterances that were revoked.
    pub revoked: usize,
    partial: Vec<i16>,
}

/// Keeps received audio in memory, readable from other threads.
///
/// Meant for tests and for embedding the pipeline as a library.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    collected: Arc<Mutex<CollectedAudio>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audio received so far.
    pub fn collected(&self) -> CollectedAudio {
        self.lock().clone()
    }

    pub fn utterance_count(&self) -> usize {
        self.lock().utterances.len()
    }

    /// Blocks until at least `count` utterances have completed or `timeout` passes.
    pub fn wait_for_utterances(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.utterance_count() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectedAudio> {
        // A panic while holding the lock leaves the data consistent enough to read.
        self.collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioSink for CollectorSink {
    fn name(&self) -> &'static str {
        "collector"
    }

    fn accept(&mut self, audio: &AudioPayload, is_final: bool) -> Result<()> {
        let mut collected = self.lock();
        collected.chunks.push(audio.clone());
        collected.partial.extend_from_slice(&audio.samples);
        if is_final {
            let samples = std::mem::take(&mut collected.partial);
            collected
                .utterances
                .push(AudioPayload::new(samples, audio.sample_rate));
        }
        Ok(())
    }

    fn revoke(&mut self) {
        let mut collected = self.lock();
        collected.partial.clear();
        collected.revoked += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_join_into_utterance() {
        let mut sink = CollectorSink::new();
        let observer = sink.clone();

        sink.accept(&AudioPayload::new(vec![1, 2], 16000), false)
            .unwrap();
        assert_eq!(observer.utterance_count(), 0);
        sink.accept(&AudioPayload::new(vec![3], 16000), true).unwrap();

        let collected = observer.collected();
        assert_eq!(collected.chunks.len(), 2);
        assert_eq!(collected.utterances.len(), 1);
        assert_eq!(collected.utterances[0].samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_revoke_discards_partial() {
        let mut sink = CollectorSink::new();
        sink.accept(&AudioPayload::new(vec![1, 2], 16000), false)
            .unwrap();
        sink.revoke();
        sink.accept(&AudioPayload::new(vec![9], 16000), true).unwrap();

        let collected = sink.collected();
        assert_eq!(collected.revoked, 1);
        assert_eq!(collected.utterances[0].samples, vec![9]);
    }

    #[test]
    fn test_wait_times_out() {
        let sink = CollectorSink::new();
        assert!(!sink.wait_for_utterances(1, Duration::from_millis(20)));
    }
}
