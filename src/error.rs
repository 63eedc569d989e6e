//! Error types for parley.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio output failed: {message}")]
    AudioOutput { message: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    // Capability errors (external collaborators)
    #[error("Capability unavailable: {capability}: {message}")]
    CapabilityUnavailable { capability: String, message: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Response generation failed: {message}")]
    Generation { message: String },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::error::PipelineError),

    // WAV encoding/decoding
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Transcript export
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ParleyError>;
