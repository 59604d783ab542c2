//! Per-location album synchronization.
//!
//! The `AlbumSynchronizer` decides, for each pin, whether its persisted
//! album can be served as-is or whether a fresh set of photos must be
//! fetched, downloaded, and stored. It owns the placeholder bookkeeping
//! (expected count) and rejects overlapping cycles on the same pin.

pub mod error;
pub mod status;
pub mod synchronizer;

pub use error::SyncError;
pub use status::{AlbumSlot, AlbumStatus, StatusUpdate, SyncOutcome, SyncPhase};
pub use synchronizer::AlbumSynchronizer;
