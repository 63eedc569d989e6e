//! Speech recognition.

pub mod station;
pub mod transcriber;

pub use station::{RecognizerModule, clean_transcription};
pub use transcriber::{MockTranscriber, Transcriber};
