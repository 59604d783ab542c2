use thiserror::Error;

use crate::models::{LocationId, PhotoId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Location not found: {0}")]
    LocationNotFound(LocationId),

    #[error("Photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("Owning location {0} no longer exists")]
    MissingOwner(LocationId),

    #[error("Album for location {location} is full ({limit} photos)")]
    AlbumFull { location: LocationId, limit: usize },

    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },

    #[error("Durable write failed, unsaved changes may be lost: {0}")]
    DurablePersistence(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether this error means the session can no longer save to disk.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::DurablePersistence(_))
    }
}
