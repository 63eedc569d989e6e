//! Turn-taking state machine.
//!
//! Decides frame by frame whether the user is speaking, has finished a turn,
//! or only produced a short burst of noise. Pure logic: no audio, no threads.

use crate::defaults;
use crate::pipeline::message::UpdateType;
use std::fmt;
use std::time::Duration;

/// Timing parameters for turn detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnConfig {
    /// Duration attributed to each frame.
    pub frame: Duration,
    /// Minimum accumulated speech for a turn to be committed.
    pub min_turn: Duration,
    /// Silence that closes a turn once exceeded.
    pub max_silence: Duration,
}

impl TurnConfig {
    pub fn from_millis(frame_ms: u32, min_turn_ms: u32, max_silence_ms: u32) -> Self {
        Self {
            frame: Duration::from_millis(frame_ms as u64),
            min_turn: Duration::from_millis(min_turn_ms as u64),
            max_silence: Duration::from_millis(max_silence_ms as u64),
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from_millis(
            defaults::FRAME_MS,
            defaults::MIN_TURN_MS,
            defaults::MAX_SILENCE_MS,
        )
    }
}

/// Where the detector is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn in progress.
    Silence,
    /// The user is speaking.
    Speech,
    /// A pause inside a turn that may or may not end it.
    SilenceTurn,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Silence => "silence",
            TurnState::Speech => "speech",
            TurnState::SilenceTurn => "silence-in-turn",
        };
        f.write_str(name)
    }
}

/// Frame-level turn detector.
#[derive(Debug, Clone)]
pub struct TurnDetector {
    config: TurnConfig,
    state: TurnState,
    speech_length: Duration,
    silence_length: Duration,
}

impl TurnDetector {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            state: TurnState::Silence,
            speech_length: Duration::ZERO,
            silence_length: Duration::ZERO,
        }
    }

    /// Advances by one classified frame.
    ///
    /// Returns the tag to emit for this frame, or `None` while idle:
    /// - every frame inside a turn is an ADD;
    /// - the frame on which trailing silence exceeds `max_silence` closes the
    ///   turn with COMMIT if enough speech accumulated, REVOKE otherwise.
    pub fn step(&mut self, is_speech: bool) -> Option<UpdateType> {
        let frame = self.config.frame;
        let previous = self.state;

        let decision = match (self.state, is_speech) {
            (TurnState::Silence, false) => None,
            (TurnState::Silence, true) | (TurnState::Speech, true) => {
                self.state = TurnState::Speech;
                self.speech_length += frame;
                Some(UpdateType::Add)
            }
            (TurnState::Speech, false) => {
                self.state = TurnState::SilenceTurn;
                self.silence_length += frame;
                Some(UpdateType::Add)
            }
            (TurnState::SilenceTurn, true) => {
                self.state = TurnState::Speech;
                self.silence_length = Duration::ZERO;
                self.speech_length += frame;
                Some(UpdateType::Add)
            }
            (TurnState::SilenceTurn, false) => {
                self.silence_length += frame;
                if self.silence_length <= self.config.max_silence {
                    Some(UpdateType::Add)
                } else {
                    let tag = if self.speech_length >= self.config.min_turn {
                        UpdateType::Commit
                    } else {
                        UpdateType::Revoke
                    };
                    tracing::debug!(
                        decision = %tag,
                        speech_ms = self.speech_length.as_millis() as u64,
                        "turn ended"
                    );
                    self.reset();
                    Some(tag)
                }
            }
        };

        if self.state != previous {
            tracing::debug!(
                from = %previous,
                state = %self.state,
                speech_ms = self.speech_length.as_millis() as u64,
                silence_ms = self.silence_length.as_millis() as u64,
                "turn state changed"
            );
        }
        decision
    }

    /// Returns to idle and clears both accumulators.
    pub fn reset(&mut self) {
        self.state = TurnState::Silence;
        self.speech_length = Duration::ZERO;
        self.silence_length = Duration::ZERO;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Speech accumulated in the current turn.
    pub fn speech_length(&self) -> Duration {
        self.speech_length
    }

    /// Length of the current pause.
    pub fn silence_length(&self) -> Duration {
        self.silence_length
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }
}
