use std::sync::Arc;

use thiserror::Error;

use crate::models::{LocationId, PhotoId};
use crate::remote::RemoteError;
use crate::store::StoreError;

/// Errors surfaced by album synchronization.
///
/// Cloneable so the last failure can be kept on a location's status.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("No photos found for this location")]
    NoResults,

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("An album update is already running for location {0}")]
    AlreadyInProgress(LocationId),

    #[error("Location not found: {0}")]
    LocationNotFound(LocationId),

    #[error("Photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("Durable write failed: {0}")]
    DurablePersistence(String),

    #[error("Store error: {0}")]
    Store(#[source] Arc<StoreError>),
}

/// Store errors compare by identity; everything else by value.
impl PartialEq for SyncError {
    fn eq(&self, other: &Self) -> bool {
        use SyncError::*;
        match (self, other) {
            (NoResults, NoResults) => true,
            (Transport(a), Transport(b)) | (Parse(a), Parse(b)) => a == b,
            (DurablePersistence(a), DurablePersistence(b)) => a == b,
            (AlreadyInProgress(a), AlreadyInProgress(b)) => a == b,
            (LocationNotFound(a), LocationNotFound(b)) => a == b,
            (PhotoNotFound(a), PhotoNotFound(b)) => a == b,
            (Store(a), Store(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for SyncError {}

impl SyncError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::NoResults => {
                "No photos were found near this pin. Try another spot or check back later."
            }
            SyncError::Transport(_) | SyncError::Parse(_) => {
                "Photos could not be loaded. Check your connection and try a new collection."
            }
            SyncError::AlreadyInProgress(_) => "This album is already being updated.",
            SyncError::LocationNotFound(_) => "This pin no longer exists.",
            SyncError::PhotoNotFound(_) => "This photo no longer exists.",
            SyncError::DurablePersistence(_) => {
                "Saving to disk failed. Recent changes are not safely stored."
            }
            SyncError::Store(_) => "The album could not be updated.",
        }
    }

    /// Whether a user-initiated refresh could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NoResults | SyncError::Transport(_) | SyncError::Parse(_)
        )
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NoResults => SyncError::NoResults,
            RemoteError::Transport(msg) => SyncError::Transport(msg),
            RemoteError::Parse(msg) => SyncError::Parse(msg),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LocationNotFound(id) | StoreError::MissingOwner(id) => {
                SyncError::LocationNotFound(id)
            }
            StoreError::PhotoNotFound(id) => SyncError::PhotoNotFound(id),
            StoreError::DurablePersistence(msg) => SyncError::DurablePersistence(msg),
            other => SyncError::Store(Arc::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reads_like_transport() {
        let transport = SyncError::from(RemoteError::Transport("reset".into()));
        let parse = SyncError::from(RemoteError::Parse("bad json".into()));
        assert_eq!(transport.user_message(), parse.user_message());
        assert!(transport.is_retryable());
        assert!(!SyncError::AlreadyInProgress(LocationId(1)).is_retryable());
    }

    #[test]
    fn test_store_errors_are_classified() {
        assert_eq!(
            SyncError::from(StoreError::MissingOwner(LocationId(3))),
            SyncError::LocationNotFound(LocationId(3))
        );
        assert!(matches!(
            SyncError::from(StoreError::DurablePersistence("disk full".into())),
            SyncError::DurablePersistence(_)
        ));
    }

    #[test]
    fn test_other_store_errors_keep_their_type() {
        let err = SyncError::from(StoreError::AlbumFull {
            location: LocationId(4),
            limit: 50,
        });
        let SyncError::Store(ref inner) = err else {
            panic!("expected Store, got {:?}", err);
        };
        assert!(matches!(
            **inner,
            StoreError::AlbumFull { location: LocationId(4), limit: 50 }
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.clone(), err);
        assert_ne!(err, SyncError::from(StoreError::LockPoisoned));
    }
}
