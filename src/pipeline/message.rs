//! Update messages: ordered (unit, lifecycle tag) pairs.

use crate::pipeline::unit::IncrementalUnit;
use std::fmt;
use std::sync::Arc;

/// Lifecycle tag attached to every unit in an update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    /// Provisional content that may still be revoked.
    Add,
    /// Retracts content previously added on the same stream.
    Revoke,
    /// Finalizes the stream up to and including this unit.
    Commit,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            UpdateType::Add => "ADD",
            UpdateType::Revoke => "REVOKE",
            UpdateType::Commit => "COMMIT",
        };
        f.write_str(tag)
    }
}

/// An ordered batch of tagged units delivered in one step.
///
/// Order within a message is significant. Units are shared, so fanning a
/// message out to several subscribers hands each of them the same objects.
#[derive(Debug, Clone, Default)]
pub struct UpdateMessage {
    pairs: Vec<(Arc<IncrementalUnit>, UpdateType)>,
}

impl UpdateMessage {
    /// Creates a message carrying a single unit.
    pub fn from_iu(unit: Arc<IncrementalUnit>, update_type: UpdateType) -> Self {
        Self {
            pairs: vec![(unit, update_type)],
        }
    }

    /// Creates a message from an explicit ordered list of pairs.
    pub fn from_pairs(pairs: Vec<(Arc<IncrementalUnit>, UpdateType)>) -> Self {
        Self { pairs }
    }

    /// Appends a pair at the end of the message.
    pub fn push(&mut self, unit: Arc<IncrementalUnit>, update_type: UpdateType) {
        self.pairs.push((unit, update_type));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates the pairs in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<IncrementalUnit>, UpdateType)> {
        self.pairs.iter().map(|(unit, tag)| (unit, *tag))
    }

    /// Tags of all pairs, in order.
    pub fn update_types(&self) -> Vec<UpdateType> {
        self.pairs.iter().map(|(_, tag)| *tag).collect()
    }
}

impl IntoIterator for UpdateMessage {
    type Item = (Arc<IncrementalUnit>, UpdateType);
    type IntoIter = std::vec::IntoIter<(Arc<IncrementalUnit>, UpdateType)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}
