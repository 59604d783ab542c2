//! Change notifications emitted once per committed transaction.

use crate::models::{EntityId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub id: EntityId,
}

impl ChangeEvent {
    pub fn kind(&self) -> EntityKind {
        self.id.kind()
    }
}

/// All events of one commit, in the order the entities were first touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Monotonic commit number; lets subscribers skip redelivered batches.
    pub generation: u64,
    pub events: Vec<ChangeEvent>,
}
