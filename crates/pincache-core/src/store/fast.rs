//! In-memory fast tier.
//!
//! `FastState` is the authoritative copy of every location and photo. It is
//! only ever mutated by committing a `Transaction`, which stages its writes
//! in an overlay and applies them all at once (or not at all). Every commit
//! also records which rows still need to reach the durable tier.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;

use super::events::{ChangeBatch, ChangeEvent, ChangeOp};
use super::StoreError;
use crate::models::{Coordinate, EntityId, Location, LocationId, Photo, PhotoId};

#[derive(Debug, Clone, Copy)]
struct Counters {
    next_location_id: i64,
    next_photo_id: i64,
    next_seq: u64,
}

impl Counters {
    fn seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Rows changed since the last durable flush.
#[derive(Debug, Default)]
struct PendingWrites {
    locations: BTreeSet<LocationId>,
    photos: BTreeSet<PhotoId>,
    deleted_locations: BTreeSet<LocationId>,
    deleted_photos: BTreeSet<PhotoId>,
}

impl PendingWrites {
    fn is_empty(&self) -> bool {
        self.locations.is_empty()
            && self.photos.is_empty()
            && self.deleted_locations.is_empty()
            && self.deleted_photos.is_empty()
    }
}

/// A drained set of pending writes, ready for the durable tier.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub locations: Vec<Location>,
    pub photos: Vec<Photo>,
    pub deleted_locations: Vec<LocationId>,
    pub deleted_photos: Vec<PhotoId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
            && self.photos.is_empty()
            && self.deleted_locations.is_empty()
            && self.deleted_photos.is_empty()
    }
}

pub(crate) struct FastState {
    locations: BTreeMap<LocationId, Location>,
    photos: BTreeMap<PhotoId, Photo>,
    albums: HashMap<LocationId, BTreeSet<PhotoId>>,
    counters: Counters,
    generation: u64,
    pending: PendingWrites,
}

impl FastState {
    /// Build the fast tier from rows restored out of the durable tier.
    pub fn restore(locations: Vec<Location>, photos: Vec<Photo>) -> Self {
        let mut counters = Counters {
            next_location_id: 1,
            next_photo_id: 1,
            next_seq: 1,
        };
        let mut state = Self {
            locations: BTreeMap::new(),
            photos: BTreeMap::new(),
            albums: HashMap::new(),
            counters,
            generation: 0,
            pending: PendingWrites::default(),
        };

        for location in locations {
            counters.next_location_id = counters.next_location_id.max(location.id.0 + 1);
            counters.next_seq = counters.next_seq.max(location.seq + 1);
            state.albums.entry(location.id).or_default();
            state.locations.insert(location.id, location);
        }
        for photo in photos {
            counters.next_photo_id = counters.next_photo_id.max(photo.id.0 + 1);
            counters.next_seq = counters.next_seq.max(photo.seq + 1);
            state.albums.entry(photo.location_id).or_default().insert(photo.id);
            state.photos.insert(photo.id, photo);
        }
        state.counters = counters;
        state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }

    pub fn photo(&self, id: PhotoId) -> Option<&Photo> {
        self.photos.get(&id)
    }

    /// All locations in display order.
    pub fn locations(&self) -> Vec<Location> {
        let mut all: Vec<Location> = self.locations.values().cloned().collect();
        all.sort_by(Location::display_cmp);
        all
    }

    /// Photos of one location in creation order.
    pub fn photos_for(&self, location: LocationId) -> Vec<Photo> {
        let mut album: Vec<Photo> = self
            .albums
            .get(&location)
            .into_iter()
            .flatten()
            .filter_map(|id| self.photos.get(id).cloned())
            .collect();
        album.sort_by_key(|p| p.seq);
        album
    }

    pub fn all_photos(&self) -> Vec<Photo> {
        self.photos.values().cloned().collect()
    }

    pub fn photo_count(&self, location: LocationId) -> usize {
        self.albums.get(&location).map(|a| a.len()).unwrap_or(0)
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take every pending write, snapshotting the current row contents.
    pub fn drain_pending(&mut self) -> ChangeSet {
        let pending = std::mem::take(&mut self.pending);
        ChangeSet {
            locations: pending
                .locations
                .iter()
                .filter_map(|id| self.locations.get(id).cloned())
                .collect(),
            photos: pending
                .photos
                .iter()
                .filter_map(|id| self.photos.get(id).cloned())
                .collect(),
            deleted_locations: pending.deleted_locations.into_iter().collect(),
            deleted_photos: pending.deleted_photos.into_iter().collect(),
        }
    }

    /// Return a drained change set that never reached disk to the pending
    /// queue. Rows changed again since the drain keep their newer state.
    pub fn requeue(&mut self, changes: &ChangeSet) {
        for location in &changes.locations {
            if self.locations.contains_key(&location.id) {
                self.pending.locations.insert(location.id);
            }
        }
        for photo in &changes.photos {
            if self.photos.contains_key(&photo.id) {
                self.pending.photos.insert(photo.id);
            }
        }
        for id in &changes.deleted_locations {
            if !self.locations.contains_key(id) {
                self.pending.deleted_locations.insert(*id);
            }
        }
        for id in &changes.deleted_photos {
            if !self.photos.contains_key(id) {
                self.pending.deleted_photos.insert(*id);
            }
        }
    }

    /// Apply a staged transaction. Returns the change batch if anything
    /// observable changed.
    pub fn commit(&mut self, staged: Staged) -> Result<Option<ChangeBatch>, StoreError> {
        self.validate(&staged)?;

        let mut events = Vec::with_capacity(staged.touched.len());
        for id in &staged.touched {
            let op = match *id {
                EntityId::Location(id) => {
                    let after = staged.locations.get(&id).cloned().flatten();
                    self.apply_location(id, after)
                }
                EntityId::Photo(id) => {
                    let after = staged.photos.get(&id).cloned().flatten();
                    self.apply_photo(id, after)
                }
            };
            if let Some(op) = op {
                events.push(ChangeEvent { op, id: *id });
            }
        }
        self.counters = staged.counters;

        if events.is_empty() {
            return Ok(None);
        }
        self.generation += 1;
        Ok(Some(ChangeBatch {
            generation: self.generation,
            events,
        }))
    }

    fn validate(&self, staged: &Staged) -> Result<(), StoreError> {
        for photo in staged.photos.values().flatten() {
            let owner_exists = match staged.locations.get(&photo.location_id) {
                Some(after) => after.is_some(),
                None => self.locations.contains_key(&photo.location_id),
            };
            if !owner_exists {
                return Err(StoreError::MissingOwner(photo.location_id));
            }
        }
        Ok(())
    }

    fn apply_location(&mut self, id: LocationId, after: Option<Location>) -> Option<ChangeOp> {
        match (self.locations.contains_key(&id), after) {
            (true, None) => {
                self.locations.remove(&id);
                self.albums.remove(&id);
                self.pending.locations.remove(&id);
                self.pending.deleted_locations.insert(id);
                Some(ChangeOp::Delete)
            }
            (existed, Some(location)) => {
                if existed && self.locations.get(&id) == Some(&location) {
                    return None;
                }
                self.locations.insert(id, location);
                self.albums.entry(id).or_default();
                self.pending.locations.insert(id);
                Some(if existed { ChangeOp::Update } else { ChangeOp::Insert })
            }
            (false, None) => None,
        }
    }

    fn apply_photo(&mut self, id: PhotoId, after: Option<Photo>) -> Option<ChangeOp> {
        let before_owner = self.photos.get(&id).map(|p| p.location_id);
        match (before_owner, after) {
            (Some(owner), None) => {
                self.photos.remove(&id);
                if let Some(album) = self.albums.get_mut(&owner) {
                    album.remove(&id);
                }
                self.pending.photos.remove(&id);
                self.pending.deleted_photos.insert(id);
                Some(ChangeOp::Delete)
            }
            (before, Some(photo)) => {
                if before.is_some() && self.photos.get(&id) == Some(&photo) {
                    return None;
                }
                if let Some(owner) = before {
                    if let Some(album) = self.albums.get_mut(&owner) {
                        album.remove(&id);
                    }
                }
                self.albums.entry(photo.location_id).or_default().insert(id);
                self.photos.insert(id, photo);
                self.pending.photos.insert(id);
                Some(if before.is_some() { ChangeOp::Update } else { ChangeOp::Insert })
            }
            (None, None) => None,
        }
    }
}

/// Writes staged by a transaction that has not been committed yet.
pub(crate) struct Staged {
    locations: BTreeMap<LocationId, Option<Location>>,
    photos: BTreeMap<PhotoId, Option<Photo>>,
    touched: Vec<EntityId>,
    counters: Counters,
}

/// A unit of work against the fast tier.
///
/// Reads see the transaction's own writes. Nothing becomes visible to
/// other readers until the closure passed to `Store::transact` returns `Ok`.
pub struct Transaction<'a> {
    base: &'a FastState,
    staged: Staged,
    album_limit: usize,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: &'a FastState, album_limit: usize) -> Self {
        Self {
            base,
            staged: Staged {
                locations: BTreeMap::new(),
                photos: BTreeMap::new(),
                touched: Vec::new(),
                counters: base.counters,
            },
            album_limit,
        }
    }

    pub(crate) fn into_staged(self) -> Staged {
        self.staged
    }

    // ===== Reads =====

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        match self.staged.locations.get(&id) {
            Some(after) => after.as_ref(),
            None => self.base.locations.get(&id),
        }
    }

    pub fn photo(&self, id: PhotoId) -> Option<&Photo> {
        match self.staged.photos.get(&id) {
            Some(after) => after.as_ref(),
            None => self.base.photos.get(&id),
        }
    }

    /// Ids of the photos currently owned by `location`, in creation order.
    pub fn photo_ids_for(&self, location: LocationId) -> Vec<PhotoId> {
        let mut ids: BTreeSet<PhotoId> = self
            .base
            .albums
            .get(&location)
            .cloned()
            .unwrap_or_default();
        for (id, after) in &self.staged.photos {
            match after {
                Some(photo) if photo.location_id == location => {
                    ids.insert(*id);
                }
                _ => {
                    ids.remove(id);
                }
            }
        }
        let mut photos: Vec<&Photo> = ids.iter().filter_map(|id| self.photo(*id)).collect();
        photos.sort_by_key(|p| p.seq);
        photos.into_iter().map(|p| p.id).collect()
    }

    pub fn photo_count(&self, location: LocationId) -> usize {
        self.photo_ids_for(location).len()
    }

    // ===== Writes =====

    fn touch(&mut self, id: EntityId) {
        let seen = match id {
            EntityId::Location(id) => self.staged.locations.contains_key(&id),
            EntityId::Photo(id) => self.staged.photos.contains_key(&id),
        };
        if !seen {
            self.staged.touched.push(id);
        }
    }

    fn stage_location(&mut self, id: LocationId, after: Option<Location>) {
        self.touch(id.into());
        self.staged.locations.insert(id, after);
    }

    fn stage_photo(&mut self, id: PhotoId, after: Option<Photo>) {
        self.touch(id.into());
        self.staged.photos.insert(id, after);
    }

    /// Create a new location with a fresh id and creation timestamp.
    pub fn insert_location(&mut self, coordinate: Coordinate, title: Option<String>) -> Location {
        let id = LocationId(self.staged.counters.next_location_id);
        self.staged.counters.next_location_id += 1;
        let location = Location {
            id,
            coordinate,
            title,
            created_at: Utc::now(),
            seq: self.staged.counters.seq(),
        };
        self.stage_location(id, Some(location.clone()));
        location
    }

    /// Insert or replace a location row as-is.
    pub fn put_location(&mut self, location: Location) {
        let counters = &mut self.staged.counters;
        counters.next_location_id = counters.next_location_id.max(location.id.0 + 1);
        counters.next_seq = counters.next_seq.max(location.seq + 1);
        self.stage_location(location.id, Some(location));
    }

    pub fn set_location_title(&mut self, id: LocationId, title: Option<String>) -> Result<(), StoreError> {
        let mut location = self
            .location(id)
            .cloned()
            .ok_or(StoreError::LocationNotFound(id))?;
        location.title = title;
        self.stage_location(id, Some(location));
        Ok(())
    }

    /// Delete a location and, with it, every photo it owns.
    /// Returns the number of photos removed.
    pub fn delete_location(&mut self, id: LocationId) -> Result<usize, StoreError> {
        if self.location(id).is_none() {
            return Err(StoreError::LocationNotFound(id));
        }
        let removed = self.clear_album(id)?;
        self.stage_location(id, None);
        Ok(removed)
    }

    /// Add a photo to `location`'s album.
    pub fn insert_photo(
        &mut self,
        location: LocationId,
        payload: Option<Vec<u8>>,
        source_url: Option<String>,
    ) -> Result<Photo, StoreError> {
        if self.location(location).is_none() {
            return Err(StoreError::MissingOwner(location));
        }
        if self.photo_count(location) >= self.album_limit {
            return Err(StoreError::AlbumFull {
                location,
                limit: self.album_limit,
            });
        }
        let id = PhotoId(self.staged.counters.next_photo_id);
        self.staged.counters.next_photo_id += 1;
        let photo = Photo {
            id,
            location_id: location,
            payload: payload.map(Arc::from),
            source_url,
            seq: self.staged.counters.seq(),
        };
        self.stage_photo(id, Some(photo.clone()));
        Ok(photo)
    }

    /// Insert or replace a photo row as-is. The owner must exist.
    pub fn put_photo(&mut self, photo: Photo) -> Result<(), StoreError> {
        if self.location(photo.location_id).is_none() {
            return Err(StoreError::MissingOwner(photo.location_id));
        }
        let is_new = self.photo(photo.id).is_none();
        if is_new && self.photo_count(photo.location_id) >= self.album_limit {
            return Err(StoreError::AlbumFull {
                location: photo.location_id,
                limit: self.album_limit,
            });
        }
        let counters = &mut self.staged.counters;
        counters.next_photo_id = counters.next_photo_id.max(photo.id.0 + 1);
        counters.next_seq = counters.next_seq.max(photo.seq + 1);
        self.stage_photo(photo.id, Some(photo));
        Ok(())
    }

    /// Attach downloaded bytes to a placeholder photo.
    pub fn set_photo_payload(&mut self, id: PhotoId, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut photo = self.photo(id).cloned().ok_or(StoreError::PhotoNotFound(id))?;
        photo.payload = Some(Arc::from(payload));
        self.stage_photo(id, Some(photo));
        Ok(())
    }

    pub fn delete_photo(&mut self, id: PhotoId) -> Result<Photo, StoreError> {
        let photo = self.photo(id).cloned().ok_or(StoreError::PhotoNotFound(id))?;
        self.stage_photo(id, None);
        Ok(photo)
    }

    /// Delete every photo of a location, keeping the location itself.
    pub fn clear_album(&mut self, location: LocationId) -> Result<usize, StoreError> {
        if self.location(location).is_none() {
            return Err(StoreError::LocationNotFound(location));
        }
        let ids = self.photo_ids_for(location);
        for id in &ids {
            self.stage_photo(*id, None);
        }
        Ok(ids.len())
    }
}
