//! pincache core - map pins with locally cached photo albums.
//!
//! Pins and their photos live in a layered [`store::Store`]: an in-memory
//! tier every read and write goes through, flushed to SQLite. The
//! [`sync::AlbumSynchronizer`] fills an empty album from a remote photo
//! search, and the [`projector::ChangeProjector`] turns store commits into
//! ordered list diffs for whatever renders them.
//!
//! Most callers only need [`PinCache`].

pub mod config;
pub mod models;
pub mod notify;
pub mod preferences;
pub mod projector;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;

pub use config::Config;
pub use models::{Coordinate, Location, LocationId, Photo, PhotoId, Viewport};
pub use projector::{ChangeProjector, ListDiff, ProjectionDiff};
pub use service::PinCache;
pub use store::{Store, StoreError};
pub use sync::{AlbumSlot, AlbumStatus, AlbumSynchronizer, SyncError, SyncOutcome, SyncPhase};
