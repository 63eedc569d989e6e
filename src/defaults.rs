//! Default configuration constants for parley.
//!
//! Shared by the configuration types and the module constructors so the two
//! never drift apart.

/// Default microphone sample rate in Hz.
///
/// 16kHz is what speech classifiers and recognizers expect.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample (16-bit signed).
pub const SAMPLE_WIDTH: u16 = 2;

/// Length of one audio frame in milliseconds.
///
/// Every frame is classified as speech or silence on its own, so this is the
/// resolution of the turn detector.
pub const FRAME_MS: u32 = 20;

/// Minimum accumulated speech for a turn to be accepted.
///
/// Bursts shorter than this (coughs, clicks, door slams) are revoked instead
/// of committed.
pub const MIN_TURN_MS: u32 = 150;

/// Longest silence tolerated inside a turn before the turn is closed.
pub const MAX_SILENCE_MS: u32 = 700;

/// Default RMS threshold for the energy speech classifier.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Sample rate produced by the speech synthesizer.
pub const TTS_SAMPLE_RATE: u32 = 24000;

/// Number of finalized utterances that may wait for synthesis.
pub const TTS_QUEUE_CAPACITY: usize = 32;

/// How long the synthesis worker blocks on its queue before checking the stop flag.
pub const WORKER_POLL_MS: u64 = 100;

/// Capacity of every inter-module channel.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Trailing silence appended to finite sources so the last turn can close.
pub const TRAILING_SILENCE_MS: u32 = 1000;

/// System prompt that opens every conversation.
pub const SYSTEM_PROMPT: &str = "Pretend to be a human talking with a friend. \
     Always answer using short sentences and be proactive during the conversation.";
