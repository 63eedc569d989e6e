//! Checks that a producer's stream obeys the ADD/REVOKE/COMMIT lifecycle.

use crate::pipeline::message::{UpdateMessage, UpdateType};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// A lifecycle violation found in a producer's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A REVOKE named a unit that was already committed.
    RevokeAfterCommit { unit: Uuid },
    /// A REVOKE named a unit this producer never added (or already discarded).
    RevokeUnknown { unit: Uuid },
    /// The same unit was added twice.
    DuplicateAdd { unit: Uuid },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::RevokeAfterCommit { unit } => {
                write!(f, "unit {} revoked after it was committed", unit)
            }
            ProtocolError::RevokeUnknown { unit } => {
                write!(f, "unit {} revoked but never added", unit)
            }
            ProtocolError::DuplicateAdd { unit } => write!(f, "unit {} added twice", unit),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Tracks one producer's stream.
///
/// ADD makes a unit outstanding. COMMIT finalizes everything outstanding on
/// the stream (a committed turn), REVOKE must name an outstanding unit and
/// discards everything outstanding (a rejected turn).
#[derive(Debug, Default)]
pub struct StreamValidator {
    outstanding: HashSet<Uuid>,
    /// Units of the most recently committed turn only.
    committed: HashSet<Uuid>,
}

impl StreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every pair of `message` in order, updating the stream state.
    ///
    /// Stops at the first violation; pairs before it have been applied.
    pub fn check(&mut self, message: &UpdateMessage) -> Result<(), ProtocolError> {
        for (unit, update_type) in message.iter() {
            let id = unit.id();
            match update_type {
                UpdateType::Add => {
                    if !self.outstanding.insert(id) {
                        return Err(ProtocolError::DuplicateAdd { unit: id });
                    }
                }
                UpdateType::Revoke => {
                    if self.committed.contains(&id) {
                        return Err(ProtocolError::RevokeAfterCommit { unit: id });
                    }
                    if !self.outstanding.contains(&id) {
                        return Err(ProtocolError::RevokeUnknown { unit: id });
                    }
                    self.outstanding.clear();
                }
                UpdateType::Commit => {
                    self.committed = std::mem::take(&mut self.outstanding);
                    self.committed.insert(id);
                }
            }
        }
        Ok(())
    }

    /// Number of units added but not yet committed or revoked.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of units remembered from the last committed turn.
    pub fn committed(&self) -> usize {
        self.committed.len()
    }
}
