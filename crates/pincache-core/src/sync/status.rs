//! Observable per-location synchronization state.

use crate::models::{LocationId, Photo};

use super::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No cycle running; the album is whatever is persisted.
    #[default]
    Idle,
    /// URL list requested, size not known yet.
    Fetching,
    /// URL list known; photos are being downloaded and stored.
    Populating,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlbumStatus {
    pub phase: SyncPhase,
    /// URLs committed to in the current cycle; 0 outside `Populating`.
    pub expected_count: usize,
    /// Photos stored so far in the current cycle.
    pub added: usize,
    /// Slots of the current cycle that failed and will not be created.
    pub failed: usize,
    pub last_error: Option<SyncError>,
}

impl AlbumStatus {
    pub fn is_busy(&self) -> bool {
        self.phase != SyncPhase::Idle
    }

    /// Placeholders still to render for downloads in flight.
    pub fn pending_placeholders(&self) -> usize {
        match self.phase {
            SyncPhase::Populating => self
                .expected_count
                .saturating_sub(self.added + self.failed),
            _ => 0,
        }
    }
}

/// Published whenever a location's status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub location: LocationId,
    pub status: AlbumStatus,
}

/// One renderable cell of an album.
#[derive(Debug, Clone, PartialEq)]
pub enum AlbumSlot {
    Photo(Photo),
    Placeholder,
}

/// How a `request` or `refresh` completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Persisted photos were served; nothing was fetched.
    Cached { count: usize },
    /// A fetch cycle ran; `added <= expected`.
    Fetched { expected: usize, added: usize },
}
