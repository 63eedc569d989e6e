//! Incremental units: the payloads exchanged between modules.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Raw PCM audio carried by an incremental unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bytes per sample.
    pub sample_width: u16,
}

impl AudioPayload {
    /// Creates a 16-bit mono payload.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            sample_width: crate::defaults::SAMPLE_WIDTH,
        }
    }

    /// Number of audio frames (one sample per frame, mono).
    pub fn nframes(&self) -> usize {
        self.samples.len()
    }

    /// Duration of the payload in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000 / self.sample_rate as u64) as u32
    }
}

/// The content of an incremental unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Audio(AudioPayload),
    Text(String),
}

/// One discrete, immutable piece of content produced by a module.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalUnit {
    id: Uuid,
    created_at: DateTime<Utc>,
    creator: &'static str,
    payload: Payload,
}

impl IncrementalUnit {
    /// Creates a unit with a fresh identifier and the current timestamp.
    pub fn new(creator: &'static str, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            creator,
            payload,
        }
    }

    /// Creates a shared audio unit.
    pub fn audio(creator: &'static str, audio: AudioPayload) -> Arc<Self> {
        Arc::new(Self::new(creator, Payload::Audio(audio)))
    }

    /// Creates a shared text unit.
    pub fn text(creator: &'static str, text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(creator, Payload::Text(text.into())))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Name of the module that created this unit.
    pub fn creator(&self) -> &'static str {
        self.creator
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the audio payload, if this is an audio unit.
    pub fn as_audio(&self) -> Option<&AudioPayload> {
        match &self.payload {
            Payload::Audio(audio) => Some(audio),
            Payload::Text(_) => None,
        }
    }

    /// Returns the text payload, if this is a text unit.
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Audio(_) => None,
        }
    }
}
