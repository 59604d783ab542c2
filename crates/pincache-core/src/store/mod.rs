//! Layered persistence for pins and their albums.
//!
//! The `Store` keeps two tiers:
//! - a fast in-memory tier that every read and write goes through, and
//! - a durable SQLite tier that only receives changes on `flush()`.
//!
//! All mutation funnels through `Store::transact`, which holds the fast-tier
//! lock for the duration of the closure, so readers never see half of a
//! transaction. Each commit publishes a `ChangeBatch` to subscribers.

pub mod durable;
pub mod error;
pub mod events;
pub mod fast;
mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::models::{Location, LocationId, Photo, PhotoId};
use crate::notify::Publisher;

use durable::DurableTier;
pub use error::StoreError;
pub use events::{ChangeBatch, ChangeEvent, ChangeOp};
use fast::FastState;
pub use fast::{ChangeSet, Transaction};

/// Point-in-time copy of the fast tier.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Generation of the last commit included in this snapshot.
    pub generation: u64,
    pub locations: Vec<Location>,
    pub photos: Vec<Photo>,
}

/// Row counts written by one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub locations_written: usize,
    pub photos_written: usize,
    pub locations_deleted: usize,
    pub photos_deleted: usize,
}

impl FlushReport {
    fn for_changes(changes: &ChangeSet) -> Self {
        Self {
            locations_written: changes.locations.len(),
            photos_written: changes.photos.len(),
            locations_deleted: changes.deleted_locations.len(),
            photos_deleted: changes.deleted_photos.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct StoreInner {
    fast: Mutex<FastState>,
    durable: Arc<DurableTier>,
    changes: Publisher<ChangeBatch>,
    flush_lock: tokio::sync::Mutex<()>,
    durable_failed: AtomicBool,
    album_limit: usize,
}

/// Handle to the shared store. Clone is cheap.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the store backed by a database file, restoring all saved rows.
    pub fn open(path: &Path, album_limit: usize) -> Result<Self, StoreError> {
        Self::with_durable(DurableTier::open(path)?, album_limit)
    }

    /// Open a store whose durable tier is an in-memory database.
    pub fn open_in_memory(album_limit: usize) -> Result<Self, StoreError> {
        Self::with_durable(DurableTier::open_in_memory()?, album_limit)
    }

    fn with_durable(durable: DurableTier, album_limit: usize) -> Result<Self, StoreError> {
        let (locations, photos) = durable.load()?;
        info!(
            locations = locations.len(),
            photos = photos.len(),
            "Restored store from disk"
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                fast: Mutex::new(FastState::restore(locations, photos)),
                durable: Arc::new(durable),
                changes: Publisher::new(),
                flush_lock: tokio::sync::Mutex::new(()),
                durable_failed: AtomicBool::new(false),
                album_limit: album_limit.max(1),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, FastState> {
        self.inner.fast.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn album_limit(&self) -> usize {
        self.inner.album_limit
    }

    /// Run `f` as one all-or-nothing transaction on the fast tier.
    ///
    /// If `f` or the final validation fails, none of its writes are applied.
    /// Returns once the in-memory commit succeeded; see `flush` for disk.
    pub fn transact<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut state = self.inner.fast.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut txn = Transaction::new(&state, self.inner.album_limit);
        let out = f(&mut txn)?;
        let staged = txn.into_staged();
        if let Some(batch) = state.commit(staged)? {
            debug!(
                generation = batch.generation,
                events = batch.events.len(),
                "Committed transaction"
            );
            // Published under the lock so subscribers see commits in order.
            self.inner.changes.publish(&batch);
        }
        Ok(out)
    }

    /// Receive a `ChangeBatch` for every future commit.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeBatch> {
        self.inner.changes.subscribe()
    }

    // ===== Queries =====

    pub fn location(&self, id: LocationId) -> Option<Location> {
        self.state().location(id).cloned()
    }

    /// All locations ordered by latitude, then creation order.
    pub fn locations(&self) -> Vec<Location> {
        self.state().locations()
    }

    pub fn photo(&self, id: PhotoId) -> Option<Photo> {
        self.state().photo(id).cloned()
    }

    /// All photos of a location in creation order.
    pub fn photos(&self, location: LocationId) -> Vec<Photo> {
        self.state().photos_for(location)
    }

    pub fn photo_count(&self, location: LocationId) -> usize {
        self.state().photo_count(location)
    }

    pub fn generation(&self) -> u64 {
        self.state().generation()
    }

    /// Several reads against one consistent state.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&FastState) -> T) -> T {
        f(&self.state())
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            generation: state.generation(),
            locations: state.locations(),
            photos: state.all_photos(),
        }
    }

    // ===== Durability =====

    /// Whether a durable flush has failed this session.
    pub fn durable_failed(&self) -> bool {
        self.inner.durable_failed.load(Ordering::SeqCst)
    }

    /// Whether the fast tier holds changes not yet on disk.
    ///
    /// Always true once a flush has failed: nothing written since can be
    /// trusted to be saved.
    pub fn has_unflushed_changes(&self) -> bool {
        self.durable_failed() || self.state().has_pending_writes()
    }

    /// Push every pending change to the durable tier.
    ///
    /// A failure is fatal for the session: the store stops accepting
    /// flushes and in-memory state must no longer be treated as saved.
    pub async fn flush(&self) -> Result<FlushReport, StoreError> {
        let _serial = self.inner.flush_lock.lock().await;
        if self.durable_failed() {
            return Err(StoreError::DurablePersistence(
                "an earlier flush failed".to_string(),
            ));
        }

        let changes = self.state().drain_pending();
        if changes.is_empty() {
            return Ok(FlushReport::default());
        }
        let report = FlushReport::for_changes(&changes);

        let durable = Arc::clone(&self.inner.durable);
        let result = tokio::task::spawn_blocking(move || {
            let applied = durable.apply(&changes);
            (changes, applied)
        })
        .await;
        let failure = match result {
            Ok((_, Ok(()))) => {
                debug!(?report, "Flushed to disk");
                return Ok(report);
            }
            Ok((changes, Err(e))) => {
                self.state().requeue(&changes);
                e.to_string()
            }
            Err(e) => format!("flush task failed: {}", e),
        };

        self.inner.durable_failed.store(true, Ordering::SeqCst);
        error!(fatal = true, error = %failure, "Durable flush failed");
        Err(StoreError::DurablePersistence(failure))
    }

    /// Flush every `every` until the first fatal failure.
    pub fn spawn_autosave(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.flush().await {
                    Ok(report) if !report.is_empty() => debug!(?report, "Autosaved"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Autosave stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinate, EntityId};

    fn coord(lat: f64) -> Coordinate {
        Coordinate::new(lat, 8.5586).unwrap()
    }

    #[test]
    fn test_transact_publishes_batch() {
        let store = Store::open_in_memory(50).unwrap();
        let mut rx = store.subscribe();

        let location = store
            .transact(|txn| Ok(txn.insert_location(coord(47.4108), None)))
            .unwrap();

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.generation, 1);
        assert_eq!(
            batch.events,
            vec![ChangeEvent {
                op: ChangeOp::Insert,
                id: EntityId::Location(location.id),
            }]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_transact_publishes_nothing() {
        let store = Store::open_in_memory(50).unwrap();
        let mut rx = store.subscribe();

        let result = store.transact(|txn| {
            let loc = txn.insert_location(coord(1.0), None);
            txn.insert_photo(loc.id, Some(vec![1]), None)?;
            txn.delete_photo(PhotoId(999))
        });

        assert!(matches!(result, Err(StoreError::PhotoNotFound(_))));
        assert!(store.locations().is_empty());
        assert!(rx.try_recv().is_err());
        assert!(!store.has_unflushed_changes());
    }

    #[test]
    fn test_locations_sorted_for_display() {
        let store = Store::open_in_memory(50).unwrap();
        store
            .transact(|txn| {
                txn.insert_location(coord(30.0), None);
                txn.insert_location(coord(-10.0), None);
                txn.insert_location(coord(30.0), None);
                Ok(())
            })
            .unwrap();

        let order: Vec<(f64, u64)> = store
            .locations()
            .iter()
            .map(|l| (l.coordinate.latitude, l.seq))
            .collect();
        assert_eq!(order, vec![(-10.0, 2), (30.0, 1), (30.0, 3)]);
    }

    #[tokio::test]
    async fn test_flush_then_reopen_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.sqlite");

        let (location, photo) = {
            let store = Store::open(&path, 50).unwrap();
            let out = store
                .transact(|txn| {
                    let loc = txn.insert_location(coord(47.4108), Some("Oerlikon".to_string()));
                    let photo = txn.insert_photo(
                        loc.id,
                        Some(vec![0x89, 0x50, 0x4e, 0x47]),
                        Some("https://live.example/42_m.jpg".to_string()),
                    )?;
                    Ok((loc, photo))
                })
                .unwrap();
            assert_eq!(store.location(out.0.id), Some(out.0.clone()));
            assert_eq!(store.photo(out.1.id), Some(out.1.clone()));

            let report = store.flush().await.unwrap();
            assert_eq!(report.locations_written, 1);
            assert_eq!(report.photos_written, 1);
            assert!(!store.has_unflushed_changes());
            out
        };

        let reopened = Store::open(&path, 50).unwrap();
        assert_eq!(reopened.locations(), vec![location.clone()]);
        assert_eq!(reopened.photos(location.id), vec![photo]);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending_is_empty() {
        let store = Store::open_in_memory(50).unwrap();
        assert!(store.flush().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deletes_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.sqlite");

        let store = Store::open(&path, 50).unwrap();
        let loc = store
            .transact(|txn| {
                let loc = txn.insert_location(coord(10.0), None);
                txn.insert_photo(loc.id, Some(vec![1]), None)?;
                Ok(loc)
            })
            .unwrap();
        store.flush().await.unwrap();

        store.transact(|txn| txn.delete_location(loc.id)).unwrap();
        let report = store.flush().await.unwrap();
        assert_eq!(report.locations_deleted, 1);
        assert_eq!(report.photos_deleted, 1);
        drop(store);

        let reopened = Store::open(&path, 50).unwrap();
        assert!(reopened.locations().is_empty());
        assert_eq!(reopened.photo_count(loc.id), 0);
    }

    #[tokio::test]
    async fn test_ids_keep_increasing_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.sqlite");

        let first = {
            let store = Store::open(&path, 50).unwrap();
            let loc = store
                .transact(|txn| Ok(txn.insert_location(coord(1.0), None)))
                .unwrap();
            store.flush().await.unwrap();
            loc
        };

        let store = Store::open(&path, 50).unwrap();
        let second = store
            .transact(|txn| Ok(txn.insert_location(coord(2.0), None)))
            .unwrap();
        assert!(second.id > first.id);
        assert!(second.seq > first.seq);
    }

    /// Make every location write on `path` fail until the trigger is dropped.
    fn break_location_writes(path: &Path) -> rusqlite::Connection {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER fail_location_writes BEFORE INSERT ON locations
             BEGIN SELECT RAISE(ABORT, 'disk gone'); END;",
        )
        .unwrap();
        conn
    }

    fn rows_on_disk(conn: &rusqlite::Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_flush_is_fatal_and_stays_unsaved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.sqlite");
        let store = Store::open(&path, 50).unwrap();
        let conn = break_location_writes(&path);

        store
            .transact(|txn| Ok(txn.insert_location(coord(47.4108), None)))
            .unwrap();
        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::DurablePersistence(_)));
        assert!(err.is_fatal());
        assert!(store.durable_failed());
        assert!(store.has_unflushed_changes());
        assert!(store.read(|state| state.has_pending_writes()));

        // Even with the disk healthy again, the session stays failed.
        conn.execute_batch("DROP TRIGGER fail_location_writes").unwrap();
        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::DurablePersistence(_)));
        assert_eq!(rows_on_disk(&conn), 0);
        assert!(store.has_unflushed_changes());
    }

    #[tokio::test]
    async fn test_autosave_writes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.sqlite");
        let store = Store::open(&path, 50).unwrap();
        let conn = rusqlite::Connection::open(&path).unwrap();
        let autosave = store.spawn_autosave(Duration::from_millis(20));

        store
            .transact(|txn| Ok(txn.insert_location(coord(1.0), None)))
            .unwrap();
        for _ in 0..200 {
            if rows_on_disk(&conn) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(rows_on_disk(&conn), 1);
        assert!(!autosave.is_finished());
        autosave.abort();
    }

    #[tokio::test]
    async fn test_autosave_stops_after_fatal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.sqlite");
        let store = Store::open(&path, 50).unwrap();
        let _conn = break_location_writes(&path);
        let autosave = store.spawn_autosave(Duration::from_millis(20));

        store
            .transact(|txn| Ok(txn.insert_location(coord(1.0), None)))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), autosave)
            .await
            .expect("autosave kept running after a failed flush")
            .unwrap();
        assert!(store.durable_failed());
        assert!(store.has_unflushed_changes());
    }
}
