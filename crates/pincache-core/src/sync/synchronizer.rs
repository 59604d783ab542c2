//! The album synchronization state machine.
//!
//! ```text
//! Idle --request (no photos)--> Fetching --URLs--> Populating --all resolved--> Idle
//!   \                              \--error--> Idle (last_error set)
//!    \--request (has photos)--> Idle (served from store)
//! ```
//!
//! At most one cycle runs per location. Every photo is committed in its
//! own transaction, so one failed download never discards earlier ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::status::{AlbumSlot, AlbumStatus, StatusUpdate, SyncOutcome, SyncPhase};
use super::SyncError;
use crate::config::DEFAULT_DOWNLOAD_CONCURRENCY;
use crate::models::{Coordinate, LocationId, PhotoId};
use crate::notify::Publisher;
use crate::remote::{AlbumSource, ImageFetcher, RemoteError};
use crate::store::{Store, StoreError};

struct SyncInner {
    store: Store,
    source: Arc<dyn AlbumSource>,
    fetcher: Arc<dyn ImageFetcher>,
    statuses: Mutex<HashMap<LocationId, AlbumStatus>>,
    updates: Publisher<StatusUpdate>,
    download_concurrency: usize,
}

impl SyncInner {
    fn statuses(&self) -> MutexGuard<'_, HashMap<LocationId, AlbumStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate a location's status and publish the result.
    fn update(&self, location: LocationId, f: impl FnOnce(&mut AlbumStatus)) {
        let mut statuses = self.statuses();
        let status = statuses.entry(location).or_default();
        f(status);
        self.updates.publish(&StatusUpdate {
            location,
            status: status.clone(),
        });
    }

    /// Return a location to `Idle`, dropping its entry if the pin is gone.
    fn settle(&self, location: LocationId, last_error: Option<SyncError>) {
        let mut statuses = self.statuses();
        let status = if self.store.location(location).is_none() {
            statuses.remove(&location);
            AlbumStatus::default()
        } else {
            let status = AlbumStatus {
                last_error,
                ..AlbumStatus::default()
            };
            statuses.insert(location, status.clone());
            status
        };
        self.updates.publish(&StatusUpdate { location, status });
    }
}

/// Resets a location to `Idle` if its cycle is dropped before finishing.
struct CycleGuard {
    inner: Arc<SyncInner>,
    location: LocationId,
    armed: bool,
}

impl CycleGuard {
    fn finish(mut self, last_error: Option<SyncError>) {
        self.armed = false;
        self.inner.settle(self.location, last_error);
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(location = %self.location, "Album cycle cancelled");
            self.inner.settle(self.location, None);
        }
    }
}

/// Keeps each location's persisted album in step with the remote source.
/// Clone is cheap; all clones share state.
#[derive(Clone)]
pub struct AlbumSynchronizer {
    inner: Arc<SyncInner>,
}

impl AlbumSynchronizer {
    pub fn new(store: Store, source: Arc<dyn AlbumSource>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self::with_download_concurrency(store, source, fetcher, DEFAULT_DOWNLOAD_CONCURRENCY)
    }

    pub fn with_download_concurrency(
        store: Store,
        source: Arc<dyn AlbumSource>,
        fetcher: Arc<dyn ImageFetcher>,
        download_concurrency: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                store,
                source,
                fetcher,
                statuses: Mutex::new(HashMap::new()),
                updates: Publisher::new(),
                download_concurrency: download_concurrency.max(1),
            }),
        }
    }

    /// Current status of a location (`Idle` if never synchronized).
    pub fn status(&self, location: LocationId) -> AlbumStatus {
        self.inner
            .statuses()
            .get(&location)
            .cloned()
            .unwrap_or_default()
    }

    /// Receive every future status transition.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusUpdate> {
        self.inner.updates.subscribe()
    }

    /// Renderable album: stored photos in creation order, followed by one
    /// placeholder per download still in flight.
    pub fn slots(&self, location: LocationId) -> Vec<AlbumSlot> {
        let photos = self.inner.store.photos(location);
        let placeholders = self.status(location).pending_placeholders();
        photos
            .into_iter()
            .map(AlbumSlot::Photo)
            .chain(std::iter::repeat(AlbumSlot::Placeholder).take(placeholders))
            .collect()
    }

    /// Make sure the location has an album, fetching one only if it has
    /// no persisted photos.
    pub async fn request(&self, location: LocationId) -> Result<SyncOutcome, SyncError> {
        let coordinate = self.coordinate(location)?;
        let guard = {
            let mut statuses = self.inner.statuses();
            if statuses.get(&location).map(AlbumStatus::is_busy).unwrap_or(false) {
                debug!(location = %location, "Rejected request, cycle in progress");
                return Err(SyncError::AlreadyInProgress(location));
            }
            let count = self.inner.store.photo_count(location);
            if count > 0 {
                debug!(location = %location, count = count, "Serving cached album");
                return Ok(SyncOutcome::Cached { count });
            }
            self.start_cycle(&mut statuses, location)
        };
        self.run_cycle(guard, coordinate).await
    }

    /// Replace the location's album: delete every photo, then fetch anew.
    pub async fn refresh(&self, location: LocationId) -> Result<SyncOutcome, SyncError> {
        let coordinate = self.coordinate(location)?;
        let guard = {
            let mut statuses = self.inner.statuses();
            if statuses.get(&location).map(AlbumStatus::is_busy).unwrap_or(false) {
                debug!(location = %location, "Rejected refresh, cycle in progress");
                return Err(SyncError::AlreadyInProgress(location));
            }
            self.start_cycle(&mut statuses, location)
        };

        match self.inner.store.transact(|txn| txn.clear_album(location)) {
            Ok(removed) => info!(location = %location, removed = removed, "Cleared album for refresh"),
            Err(e) => {
                let err = SyncError::from(e);
                guard.finish(Some(err.clone()));
                return Err(err);
            }
        }
        self.run_cycle(guard, coordinate).await
    }

    /// Delete one photo. Does not touch any running cycle.
    pub fn remove_photo(&self, location: LocationId, photo: PhotoId) -> Result<(), SyncError> {
        self.inner.store.transact(|txn| match txn.photo(photo) {
            Some(p) if p.location_id == location => txn.delete_photo(photo).map(|_| ()),
            _ => Err(StoreError::PhotoNotFound(photo)),
        })?;
        debug!(location = %location, photo = %photo, "Removed photo");
        Ok(())
    }

    /// Drop the status of a location that is idle, e.g. after deleting it.
    pub fn forget(&self, location: LocationId) {
        let mut statuses = self.inner.statuses();
        if statuses.get(&location).map(|s| !s.is_busy()).unwrap_or(false) {
            statuses.remove(&location);
        }
    }

    fn coordinate(&self, location: LocationId) -> Result<Coordinate, SyncError> {
        self.inner
            .store
            .location(location)
            .map(|l| l.coordinate)
            .ok_or(SyncError::LocationNotFound(location))
    }

    fn start_cycle(
        &self,
        statuses: &mut HashMap<LocationId, AlbumStatus>,
        location: LocationId,
    ) -> CycleGuard {
        let status = AlbumStatus {
            phase: SyncPhase::Fetching,
            ..AlbumStatus::default()
        };
        statuses.insert(location, status.clone());
        self.inner.updates.publish(&StatusUpdate { location, status });
        CycleGuard {
            inner: Arc::clone(&self.inner),
            location,
            armed: true,
        }
    }

    async fn run_cycle(&self, guard: CycleGuard, coordinate: Coordinate) -> Result<SyncOutcome, SyncError> {
        let location = guard.location;
        info!(location = %location, %coordinate, "Fetching album");

        let mut urls = match self.inner.source.fetch_album_urls(coordinate).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(location = %location, error = %e, "Album fetch failed");
                let err = SyncError::from(e);
                guard.finish(Some(err.clone()));
                return Err(err);
            }
        };
        urls.truncate(self.inner.store.album_limit());
        if urls.is_empty() {
            guard.finish(Some(SyncError::NoResults));
            return Err(SyncError::NoResults);
        }

        let expected = urls.len();
        self.inner.update(location, |s| {
            s.phase = SyncPhase::Populating;
            s.expected_count = expected;
        });

        let fetcher = Arc::clone(&self.inner.fetcher);
        let mut downloads = stream::iter(urls)
            .map(|url| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    let result = fetcher.fetch_image(&url).await;
                    (url, result)
                }
            })
            .buffered(self.inner.download_concurrency);

        let mut added = 0;
        while let Some((url, result)) = downloads.next().await {
            let stored = self.persist(location, url, result);
            if stored {
                added += 1;
            }
            self.inner.update(location, |s| {
                if stored {
                    s.added += 1;
                } else {
                    s.failed += 1;
                }
            });
        }

        info!(location = %location, expected = expected, added = added, "Album populated");
        guard.finish(None);
        Ok(SyncOutcome::Fetched { expected, added })
    }

    /// Store one downloaded image. Failures are logged and swallowed.
    fn persist(&self, location: LocationId, url: String, result: Result<Vec<u8>, RemoteError>) -> bool {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(location = %location, url = %url, error = %e, "Photo download failed");
                return false;
            }
        };
        match self
            .inner
            .store
            .transact(|txn| txn.insert_photo(location, Some(bytes), Some(url.clone())))
        {
            Ok(photo) => {
                debug!(location = %location, photo = %photo.id, bytes = photo.payload_len(), "Stored photo");
                true
            }
            Err(StoreError::MissingOwner(_)) => {
                debug!(location = %location, url = %url, "Location removed mid-fetch, dropping photo");
                false
            }
            Err(e) => {
                warn!(location = %location, url = %url, error = %e, "Failed to store photo");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
