//! End-to-end: place a pin, fill its album, flush, reopen.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pincache_core::remote::{AlbumSource, ImageFetcher, RemoteError};
use pincache_core::{Config, Coordinate, PinCache, SyncOutcome, SyncPhase};

struct FixedAlbum {
    urls: Vec<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl AlbumSource for FixedAlbum {
    async fn fetch_album_urls(&self, _coordinate: Coordinate) -> Result<Vec<String>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.urls.clone())
    }
}

struct EchoFetcher;

#[async_trait]
impl ImageFetcher for EchoFetcher {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(url.as_bytes().to_vec())
    }
}

fn config_in(dir: &std::path::Path) -> Config {
    Config {
        data_dir: Some(dir.to_path_buf()),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_album_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let source = Arc::new(FixedAlbum {
        urls: (0..6)
            .map(|i| format!("https://live.example/{}_m.jpg", i))
            .collect(),
        calls: AtomicUsize::new(0),
    });

    let (pin, photos) = {
        let cache = PinCache::open(&config, source.clone(), Arc::new(EchoFetcher)).unwrap();
        let pin = cache
            .place_location(47.4108, 8.5586, Some("Oerlikon".to_string()))
            .unwrap();

        let outcome = cache.album().request(pin.id).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Fetched { expected: 6, added: 6 });
        assert_eq!(cache.album().status(pin.id).phase, SyncPhase::Idle);

        let report = cache.flush().await.unwrap();
        assert_eq!(report.locations_written, 1);
        assert_eq!(report.photos_written, 6);
        let photos = cache.list_photos(pin.id);
        (pin, photos)
    };

    let cache = PinCache::open(&config, source.clone(), Arc::new(EchoFetcher)).unwrap();
    assert_eq!(cache.list_locations(), vec![pin.clone()]);
    assert_eq!(cache.list_photos(pin.id), photos);

    let outcome = cache.album().request(pin.id).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Cached { count: 6 });
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_removed_pin_stays_removed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let source = Arc::new(FixedAlbum {
        urls: vec!["https://live.example/a_m.jpg".to_string()],
        calls: AtomicUsize::new(0),
    });

    {
        let cache = PinCache::open(&config, source.clone(), Arc::new(EchoFetcher)).unwrap();
        let keep = cache.place_location(10.0, 10.0, None).unwrap();
        let gone = cache.place_location(20.0, 20.0, None).unwrap();
        cache.album().request(gone.id).await.unwrap();
        cache.flush().await.unwrap();

        assert_eq!(cache.remove_location(gone.id).unwrap(), 1);
        cache.flush().await.unwrap();
        assert_eq!(cache.list_locations(), vec![keep]);
    }

    let cache = PinCache::open(&config, source, Arc::new(EchoFetcher)).unwrap();
    let locations = cache.list_locations();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].coordinate, Coordinate::new(10.0, 10.0).unwrap());
}
