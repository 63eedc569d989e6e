//! parley - Incremental spoken-dialogue pipeline
//!
//! Audio frames flow through turn detection, speech recognition, response
//! generation and speech synthesis as incremental units tagged ADD, REVOKE
//! or COMMIT.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dialogue;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod pipeline;
pub mod sink;
pub mod stt;
pub mod tts;
pub mod turn;

// Composition root
#[cfg(feature = "cli")]
pub mod app;

// Capabilities (source → turn → recognize → respond → synthesize → sink)
pub use audio::source::AudioSource;
pub use audio::vad::SpeechClassifier;
pub use dialogue::responder::Responder;
pub use sink::AudioSink;
pub use stt::transcriber::Transcriber;
pub use tts::synthesizer::Synthesizer;

// Pipeline
pub use pipeline::graph::{GraphConfig, ModuleId, PipelineGraph, PipelineHandle};
pub use pipeline::message::{UpdateMessage, UpdateType};
pub use pipeline::unit::{AudioPayload, IncrementalUnit, Payload};

// Error handling
pub use error::{ParleyError, Result};

// Config
pub use config::Config;

// Module framework (for custom stages)
pub use pipeline::error::{ErrorReporter, ModuleError, PipelineError};
pub use pipeline::module::Module;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
