//! Remote photo sources.
//!
//! This module provides:
//! - `AlbumSource`: coordinate in, bounded list of image URLs out
//! - `ImageFetcher`: download the bytes behind one URL
//! - `SearchAlbumSource`: the two-step search-and-sample protocol, generic
//!   over any `PhotoSearch` transport
//! - `FlickrClient`: the `reqwest` transport for the Flickr REST API
//!
//! Nothing here retries. Retry is always the caller's decision.

pub mod album;
pub mod error;
pub mod flickr;
pub mod search;

use async_trait::async_trait;

use crate::models::Coordinate;

pub use album::SearchAlbumSource;
pub use error::RemoteError;
pub use flickr::FlickrClient;
pub use search::{BoundingBox, PhotoRecord, PhotoSearch, SearchPage};

/// Produces the URLs that make up a location's album.
#[async_trait]
pub trait AlbumSource: Send + Sync {
    /// Return distinct image URLs for the area around `coordinate`.
    async fn fetch_album_urls(&self, coordinate: Coordinate) -> Result<Vec<String>, RemoteError>;
}

/// Downloads a single image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Source and fetcher for sessions without network access. Every call fails
/// with a transport error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

const OFFLINE: &str = "offline session";

#[async_trait]
impl AlbumSource for Offline {
    async fn fetch_album_urls(&self, _coordinate: Coordinate) -> Result<Vec<String>, RemoteError> {
        Err(RemoteError::Transport(OFFLINE.to_string()))
    }
}

#[async_trait]
impl ImageFetcher for Offline {
    async fn fetch_image(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        Err(RemoteError::Transport(OFFLINE.to_string()))
    }
}
