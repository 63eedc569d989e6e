//! Speech synthesis: the synthesizer capability, its worker and module.

pub mod station;
pub mod synthesizer;
pub mod worker;

pub use station::SynthesisModule;
pub use synthesizer::{ChunkIter, Synthesizer, ToneSynthesizer};
pub use worker::{SynthesisWorker, WorkItem};
