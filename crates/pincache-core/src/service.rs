//! Collaborator-facing entry point tying the store, the synchronizer and
//! the projector together.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::models::{Coordinate, Location, LocationId, Photo};
use crate::projector::{ChangeProjector, ProjectionDiff};
use crate::remote::{AlbumSource, FlickrClient, ImageFetcher, Offline, SearchAlbumSource};
use crate::store::{FlushReport, Store, StoreError};
use crate::sync::AlbumSynchronizer;

pub struct PinCache {
    store: Store,
    album: AlbumSynchronizer,
    autosave: Option<JoinHandle<()>>,
}

impl PinCache {
    /// Open the on-disk store named by `config`.
    ///
    /// Starts autosave when `config.autosave_secs` is set, which requires a
    /// running tokio runtime.
    pub fn open(
        config: &Config,
        source: Arc<dyn AlbumSource>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Result<Self> {
        let path = config.database_path()?;
        let store = Store::open(&path, config.album_limit())
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        info!(path = %path.display(), "Opened pin store");
        Ok(Self::assemble(store, config, source, fetcher))
    }

    /// Open with the Flickr client as both album source and image fetcher.
    pub fn open_with_flickr(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("No API key configured (set PINCACHE_API_KEY or api_key in config.json)")?;
        let client = FlickrClient::new(api_key, config.request_timeout())
            .context("Failed to build HTTP client")?;
        let source = SearchAlbumSource::new(client.clone())
            .with_max_album_size(config.album_limit())
            .with_search_extent(config.bbox_half_width, config.bbox_half_height);
        Self::open(config, Arc::new(source), Arc::new(client))
    }

    /// Open the on-disk store without network access. No API key is needed;
    /// album fetches fail with a transport error.
    pub fn open_offline(config: &Config) -> Result<Self> {
        Self::open(config, Arc::new(Offline), Arc::new(Offline))
    }

    /// Session backed by an in-memory database; nothing survives the process.
    pub fn open_in_memory(
        config: &Config,
        source: Arc<dyn AlbumSource>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Result<Self> {
        let store = Store::open_in_memory(config.album_limit())?;
        Ok(Self::assemble(store, config, source, fetcher))
    }

    fn assemble(
        store: Store,
        config: &Config,
        source: Arc<dyn AlbumSource>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        let album = AlbumSynchronizer::with_download_concurrency(
            store.clone(),
            source,
            fetcher,
            config.download_concurrency,
        );
        let autosave = config
            .autosave_interval()
            .map(|every| store.spawn_autosave(every));
        Self {
            store,
            album,
            autosave,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Album synchronization for every pin.
    pub fn album(&self) -> &AlbumSynchronizer {
        &self.album
    }

    /// Pins in display order.
    pub fn list_locations(&self) -> Vec<Location> {
        self.store.locations()
    }

    pub fn list_photos(&self, location: LocationId) -> Vec<Photo> {
        self.store.photos(location)
    }

    /// Drop a new pin.
    pub fn place_location(
        &self,
        latitude: f64,
        longitude: f64,
        title: Option<String>,
    ) -> Result<Location, StoreError> {
        let coordinate = Coordinate::new(latitude, longitude)
            .ok_or(StoreError::InvalidCoordinate { latitude, longitude })?;
        let location = self
            .store
            .transact(|txn| Ok(txn.insert_location(coordinate, title)))?;
        info!(location = %location.id, %coordinate, "Placed pin");
        Ok(location)
    }

    /// Delete a pin with its album. Returns the number of photos removed.
    pub fn remove_location(&self, location: LocationId) -> Result<usize, StoreError> {
        let removed = self.store.transact(|txn| txn.delete_location(location))?;
        self.album.forget(location);
        info!(location = %location, photos = removed, "Removed pin");
        Ok(removed)
    }

    /// Store a display title, e.g. a reverse-geocoded place name.
    pub fn set_location_title(
        &self,
        location: LocationId,
        title: Option<String>,
    ) -> Result<(), StoreError> {
        self.store
            .transact(|txn| txn.set_location_title(location, title))
    }

    /// Spawn a projector and return its diff stream, starting with the
    /// current state.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProjectionDiff> {
        let (projector, changes) = ChangeProjector::attach(self.store.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(projector.run(changes, tx));
        rx
    }

    pub async fn flush(&self) -> Result<FlushReport, StoreError> {
        self.store.flush().await
    }
}

impl Drop for PinCache {
    fn drop(&mut self) {
        if let Some(handle) = self.autosave.take() {
            handle.abort();
        }
    }
}
