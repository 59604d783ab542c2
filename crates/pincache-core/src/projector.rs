//! Ordered, diffed view of the store for observers.
//!
//! The projector keeps the location list (latitude, then creation order)
//! and each location's photo list (creation order). For every group of
//! change batches it re-reads the touched entities and emits the minimal
//! `(added, removed, updated)` diff. Batches that arrive in a burst are
//! coalesced into one diff.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{EntityId, Location, LocationId, Photo, PhotoId};
use crate::store::{ChangeBatch, Store};

/// Index changes for one ordered list.
///
/// `removed` indices refer to the list before the change; `added` and
/// `updated` indices refer to the list after it. An entry whose sort key
/// changed is reported as removed and added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDiff<Id> {
    pub added: Vec<(usize, Id)>,
    pub removed: Vec<(usize, Id)>,
    pub updated: Vec<(usize, Id)>,
}

impl<Id> Default for ListDiff<Id> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
        }
    }
}

impl<Id> ListDiff<Id> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Everything that changed between two projected states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectionDiff {
    /// Newest commit reflected in this diff.
    pub generation: u64,
    pub locations: ListDiff<LocationId>,
    /// Per-location photo changes; locations without changes are absent.
    pub photos: BTreeMap<LocationId, ListDiff<PhotoId>>,
}

impl ProjectionDiff {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.photos.is_empty()
    }
}

fn diff_lists<T, Id, K>(
    old: &[T],
    new: &[T],
    id_of: impl Fn(&T) -> Id,
    key_of: impl Fn(&T) -> K,
) -> ListDiff<Id>
where
    T: PartialEq,
    Id: Copy + Eq + Hash,
    K: PartialEq,
{
    let old_index: HashMap<Id, usize> = old.iter().enumerate().map(|(i, t)| (id_of(t), i)).collect();
    let new_index: HashMap<Id, usize> = new.iter().enumerate().map(|(i, t)| (id_of(t), i)).collect();

    let mut diff = ListDiff::default();
    for (i, item) in old.iter().enumerate() {
        let id = id_of(item);
        match new_index.get(&id) {
            Some(&j) if key_of(&new[j]) == key_of(item) => {}
            _ => diff.removed.push((i, id)),
        }
    }
    for (j, item) in new.iter().enumerate() {
        let id = id_of(item);
        match old_index.get(&id) {
            Some(&i) if key_of(&old[i]) == key_of(item) => {
                if old[i] != *item {
                    diff.updated.push((j, id));
                }
            }
            _ => diff.added.push((j, id)),
        }
    }
    diff
}

fn location_key(location: &Location) -> (f64, u64) {
    (location.coordinate.latitude, location.seq)
}

/// Reducer from the store's change stream to ordered observer lists.
pub struct ChangeProjector {
    store: Store,
    generation: u64,
    locations: Vec<Location>,
    photos: BTreeMap<LocationId, Vec<Photo>>,
    owners: HashMap<PhotoId, LocationId>,
}

impl ChangeProjector {
    /// Subscribe to `store`, then project its current state.
    ///
    /// Subscribing first guarantees no commit falls between the snapshot
    /// and the stream; batches already in the snapshot are skipped by
    /// generation.
    pub fn attach(store: Store) -> (Self, mpsc::UnboundedReceiver<ChangeBatch>) {
        let changes = store.subscribe();
        let (generation, locations, photos) =
            store.read(|state| (state.generation(), state.locations(), state.all_photos()));

        let mut albums: BTreeMap<LocationId, Vec<Photo>> = BTreeMap::new();
        let mut owners = HashMap::with_capacity(photos.len());
        for photo in photos {
            owners.insert(photo.id, photo.location_id);
            albums.entry(photo.location_id).or_default().push(photo);
        }
        for album in albums.values_mut() {
            album.sort_by_key(|p| p.seq);
        }

        let projector = Self {
            store,
            generation,
            locations,
            photos: albums,
            owners,
        };
        (projector, changes)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn photos(&self, location: LocationId) -> &[Photo] {
        self.photos.get(&location).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Diff that builds the current projection from nothing.
    pub fn initial_diff(&self) -> ProjectionDiff {
        ProjectionDiff {
            generation: self.generation,
            locations: diff_lists(&[], &self.locations, |l| l.id, location_key),
            photos: self
                .photos
                .iter()
                .map(|(id, album)| (*id, diff_lists(&[], album, |p| p.id, |p| p.seq)))
                .collect(),
        }
    }

    /// Fold a group of batches into the projection.
    ///
    /// Returns `None` when every batch was already seen or nothing visible
    /// changed.
    pub fn apply(&mut self, batches: &[ChangeBatch]) -> Option<ProjectionDiff> {
        let fresh: Vec<&ChangeBatch> = batches
            .iter()
            .filter(|b| b.generation > self.generation)
            .collect();
        let newest = fresh.iter().map(|b| b.generation).max()?;

        let mut touched_locations = BTreeSet::new();
        let mut touched_photos = BTreeSet::new();
        for event in fresh.iter().flat_map(|b| b.events.iter()) {
            match event.id {
                EntityId::Location(id) => {
                    touched_locations.insert(id);
                }
                EntityId::Photo(id) => {
                    touched_photos.insert(id);
                }
            }
        }

        let mut albums: BTreeSet<LocationId> = touched_locations.clone();
        albums.extend(touched_photos.iter().filter_map(|id| self.owners.get(id).copied()));

        let (locations, photos, albums) = self.store.read(|state| {
            let locations: Vec<(LocationId, Option<Location>)> = touched_locations
                .iter()
                .map(|id| (*id, state.location(*id).cloned()))
                .collect();
            albums.extend(
                touched_photos
                    .iter()
                    .filter_map(|id| state.photo(*id).map(|p| p.location_id)),
            );
            let photos: Vec<(LocationId, Vec<Photo>)> = albums
                .iter()
                .map(|id| (*id, state.photos_for(*id)))
                .collect();
            (locations, photos, albums)
        });
        debug!(
            generation = newest,
            locations = locations.len(),
            albums = albums.len(),
            "Projecting change batches"
        );

        let mut next = self.locations.clone();
        next.retain(|l| !touched_locations.contains(&l.id));
        next.extend(locations.into_iter().filter_map(|(_, l)| l));
        next.sort_by(Location::display_cmp);

        let mut diff = ProjectionDiff {
            generation: newest,
            locations: diff_lists(&self.locations, &next, |l| l.id, location_key),
            photos: BTreeMap::new(),
        };
        self.locations = next;

        for (location, album) in photos {
            let old = self.photos.get(&location).map(Vec::as_slice).unwrap_or(&[]);
            let album_diff = diff_lists(old, &album, |p| p.id, |p| p.seq);
            for photo in old {
                self.owners.remove(&photo.id);
            }
            for photo in &album {
                self.owners.insert(photo.id, location);
            }
            if !album_diff.is_empty() {
                diff.photos.insert(location, album_diff);
            }
            if album.is_empty() {
                self.photos.remove(&location);
            } else {
                self.photos.insert(location, album);
            }
        }

        self.generation = newest;
        (!diff.is_empty()).then_some(diff)
    }

    /// Project until the store or the observer goes away.
    ///
    /// The current state is sent first as an all-`added` diff.
    pub async fn run(
        mut self,
        mut changes: mpsc::UnboundedReceiver<ChangeBatch>,
        observer: mpsc::UnboundedSender<ProjectionDiff>,
    ) {
        if observer.send(self.initial_diff()).is_err() {
            return;
        }
        loop {
            let first = tokio::select! {
                batch = changes.recv() => match batch {
                    Some(batch) => batch,
                    None => return,
                },
                _ = observer.closed() => {
                    debug!("Projection observer closed");
                    return;
                }
            };
            let mut batches = vec![first];
            while let Ok(more) = changes.try_recv() {
                batches.push(more);
            }
            if let Some(diff) = self.apply(&batches) {
                if observer.send(diff).is_err() {
                    debug!("Projection observer closed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;

    fn coord(lat: f64) -> Coordinate {
        Coordinate::new(lat, 8.5586).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChangeBatch>) -> Vec<ChangeBatch> {
        let mut out = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            out.push(batch);
        }
        out
    }

    fn assert_matches_store(projector: &ChangeProjector, store: &Store) {
        assert_eq!(projector.locations(), store.locations().as_slice());
        for location in store.locations() {
            assert_eq!(projector.photos(location.id), store.photos(location.id).as_slice());
        }
    }

    #[test]
    fn test_diff_lists_reports_positions() {
        let old = vec![(1, 'a'), (2, 'b'), (3, 'c')];
        let new = vec![(1, 'a'), (3, 'x'), (4, 'd')];
        let diff = diff_lists(&old, &new, |t| t.0, |_| ());
        assert_eq!(diff.removed, vec![(1, 2)]);
        assert_eq!(diff.added, vec![(2, 4)]);
        assert_eq!(diff.updated, vec![(1, 3)]);
    }

    #[test]
    fn test_location_inserts_are_sorted_by_latitude() {
        let store = Store::open_in_memory(50).unwrap();
        let (mut projector, mut rx) = ChangeProjector::attach(store.clone());

        let (north, south) = store
            .transact(|txn| {
                let north = txn.insert_location(coord(50.0), None);
                let south = txn.insert_location(coord(-20.0), None);
                Ok((north, south))
            })
            .unwrap();

        let diff = projector.apply(&drain(&mut rx)).unwrap();
        assert_eq!(diff.generation, 1);
        assert_eq!(diff.locations.added, vec![(0, south.id), (1, north.id)]);
        assert!(diff.locations.removed.is_empty());
        assert_matches_store(&projector, &store);
    }

    #[test]
    fn test_coalesced_photo_inserts() {
        let store = Store::open_in_memory(50).unwrap();
        let location = store
            .transact(|txn| Ok(txn.insert_location(coord(47.4108), None)))
            .unwrap();
        let (mut projector, mut rx) = ChangeProjector::attach(store.clone());

        for i in 0..6u8 {
            store
                .transact(|txn| txn.insert_photo(location.id, Some(vec![i]), None))
                .unwrap();
        }

        let batches = drain(&mut rx);
        assert_eq!(batches.len(), 6);
        let diff = projector.apply(&batches).unwrap();
        assert!(diff.locations.is_empty());
        let album = &diff.photos[&location.id];
        assert_eq!(album.added.len(), 6);
        assert_eq!(
            album.added.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
        assert_matches_store(&projector, &store);
    }

    #[test]
    fn test_redelivered_batches_are_skipped() {
        let store = Store::open_in_memory(50).unwrap();
        let (mut projector, mut rx) = ChangeProjector::attach(store.clone());
        store
            .transact(|txn| Ok(txn.insert_location(coord(1.0), None)))
            .unwrap();

        let batches = drain(&mut rx);
        assert!(projector.apply(&batches).is_some());
        assert!(projector.apply(&batches).is_none());
        assert_eq!(projector.generation(), 1);
    }

    #[test]
    fn test_snapshot_state_is_not_replayed() {
        let store = Store::open_in_memory(50).unwrap();
        store
            .transact(|txn| Ok(txn.insert_location(coord(1.0), None)))
            .unwrap();

        let (projector, _rx) = ChangeProjector::attach(store.clone());
        assert_eq!(projector.generation(), 1);
        assert_eq!(projector.locations().len(), 1);

        let initial = projector.initial_diff();
        assert_eq!(initial.locations.added.len(), 1);
    }

    #[test]
    fn test_location_delete_removes_album() {
        let store = Store::open_in_memory(50).unwrap();
        let location = store
            .transact(|txn| {
                let loc = txn.insert_location(coord(10.0), None);
                txn.insert_photo(loc.id, Some(vec![1]), None)?;
                txn.insert_photo(loc.id, Some(vec![2]), None)?;
                Ok(loc)
            })
            .unwrap();
        let (mut projector, mut rx) = ChangeProjector::attach(store.clone());
        let photos = store.photos(location.id);

        store.transact(|txn| txn.delete_location(location.id)).unwrap();
        let diff = projector.apply(&drain(&mut rx)).unwrap();

        assert_eq!(diff.locations.removed, vec![(0, location.id)]);
        assert_eq!(
            diff.photos[&location.id].removed,
            vec![(0, photos[0].id), (1, photos[1].id)]
        );
        assert!(projector.locations().is_empty());
        assert!(projector.photos(location.id).is_empty());
    }

    #[test]
    fn test_title_change_is_an_update() {
        let store = Store::open_in_memory(50).unwrap();
        let location = store
            .transact(|txn| Ok(txn.insert_location(coord(10.0), None)))
            .unwrap();
        let (mut projector, mut rx) = ChangeProjector::attach(store.clone());

        store
            .transact(|txn| txn.set_location_title(location.id, Some("Oerlikon".to_string())))
            .unwrap();
        let diff = projector.apply(&drain(&mut rx)).unwrap();
        assert_eq!(diff.locations.updated, vec![(0, location.id)]);
        assert!(diff.locations.added.is_empty());
        assert_eq!(
            projector.locations()[0].title.as_deref(),
            Some("Oerlikon")
        );
    }

    #[test]
    fn test_moved_location_is_removed_and_added() {
        let store = Store::open_in_memory(50).unwrap();
        let (a, b) = store
            .transact(|txn| {
                let a = txn.insert_location(coord(1.0), None);
                let b = txn.insert_location(coord(2.0), None);
                Ok((a, b))
            })
            .unwrap();
        let (mut projector, mut rx) = ChangeProjector::attach(store.clone());

        let mut moved = a.clone();
        moved.coordinate = coord(3.0);
        store.transact(|txn| {
            txn.put_location(moved);
            Ok(())
        })
        .unwrap();

        let diff = projector.apply(&drain(&mut rx)).unwrap();
        assert_eq!(diff.locations.removed, vec![(0, a.id)]);
        assert_eq!(diff.locations.added, vec![(1, a.id)]);
        assert_eq!(projector.locations()[0].id, b.id);
    }

    #[tokio::test]
    async fn test_run_emits_initial_then_changes() {
        let store = Store::open_in_memory(50).unwrap();
        let (projector, changes) = ChangeProjector::attach(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(projector.run(changes, tx));

        let initial = rx.recv().await.unwrap();
        assert!(initial.is_empty());

        let location = store
            .transact(|txn| Ok(txn.insert_location(coord(5.0), None)))
            .unwrap();
        let diff = rx.recv().await.unwrap();
        assert_eq!(diff.locations.added, vec![(0, location.id)]);

        drop(rx);
        task.await.unwrap();
    }
}
