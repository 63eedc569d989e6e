//! Buffer-then-finalize helper for stages that need a whole turn.

use crate::pipeline::message::UpdateType;

/// Accumulates the payloads of one turn until it is committed or revoked.
///
/// - ADD appends.
/// - REVOKE drops everything buffered and yields nothing.
/// - COMMIT appends the final payload and yields the whole turn in arrival
///   order, leaving the buffer empty.
#[derive(Debug)]
pub struct TurnBuffer<T> {
    items: Vec<T>,
}

impl<T> Default for TurnBuffer<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> TurnBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one tagged payload. Returns the completed turn on COMMIT.
    pub fn apply(&mut self, update_type: UpdateType, payload: T) -> Option<Vec<T>> {
        match update_type {
            UpdateType::Add => {
                self.items.push(payload);
                None
            }
            UpdateType::Revoke => {
                self.items.clear();
                None
            }
            UpdateType::Commit => {
                self.items.push(payload);
                Some(std::mem::take(&mut self.items))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops any partial turn.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
