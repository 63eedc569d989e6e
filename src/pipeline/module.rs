//! The module abstraction every pipeline stage implements.

use crate::pipeline::error::ModuleError;
use crate::pipeline::graph::Emitter;
use crate::pipeline::message::UpdateMessage;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// A processing stage in the dialogue pipeline.
///
/// Each module runs on its own thread and receives update messages from the
/// modules it subscribes to. Whatever `process_update` returns is delivered to
/// every subscriber of this module.
pub trait Module: Send + 'static {
    /// Returns the name of this module for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Acquires external resources (devices, models, files).
    ///
    /// Must be idempotent. Return an error when a required capability is
    /// unavailable; the pipeline refuses to start.
    fn setup(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called once after `setup`, before the module receives its first message.
    ///
    /// Modules that produce output from their own thread keep a clone of the
    /// emitter and start that thread here.
    fn prepare_run(&mut self, _emitter: &Emitter) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Processes one update message.
    ///
    /// Returns:
    /// - `Ok(Some(message))` - delivered to all subscribers
    /// - `Ok(None)` - nothing to emit (buffered, filtered, or handed to a worker)
    /// - `Err(ModuleError)` - reported; the message is dropped
    fn process_update(&mut self, message: UpdateMessage)
    -> Result<Option<UpdateMessage>, ModuleError>;

    /// Releases resources and joins owned threads.
    ///
    /// Called exactly once, also after a partial or failed setup.
    fn shutdown(&mut self) {}
}

/// Lifecycle of a module. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleState {
    Uninitialized = 0,
    Ready = 1,
    Running = 2,
    Stopped = 3,
}

impl ModuleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ModuleState::Uninitialized,
            1 => ModuleState::Ready,
            2 => ModuleState::Running,
            _ => ModuleState::Stopped,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Uninitialized => "uninitialized",
            ModuleState::Ready => "ready",
            ModuleState::Running => "running",
            ModuleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, monotonic holder of a module's lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ModuleState {
        ModuleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves to `state` unless the cell is already past it.
    pub fn advance(&self, state: ModuleState) {
        self.0.fetch_max(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_uninitialized() {
        assert_eq!(StateCell::new().get(), ModuleState::Uninitialized);
    }

    #[test]
    fn test_state_advances_forward() {
        let cell = StateCell::new();
        cell.advance(ModuleState::Ready);
        assert_eq!(cell.get(), ModuleState::Ready);
        cell.advance(ModuleState::Running);
        assert_eq!(cell.get(), ModuleState::Running);
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let cell = StateCell::new();
        cell.advance(ModuleState::Stopped);
        cell.advance(ModuleState::Ready);
        assert_eq!(cell.get(), ModuleState::Stopped);
    }

    #[test]
    fn test_clones_share_state() {
        let cell = StateCell::new();
        let other = cell.clone();
        other.advance(ModuleState::Running);
        assert_eq!(cell.get(), ModuleState::Running);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ModuleState::Running.to_string(), "running");
    }
}
