//! Two-step search-and-sample album protocol.
//!
//! 1. Ask for the first page to learn how many result pages exist.
//! 2. Re-query one uniformly random page among the first reliable ones.
//! 3. Sample up to `max_album_size` records from it without replacement.

use std::collections::HashSet;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::search::{BoundingBox, PhotoRecord, PhotoSearch};
use super::{AlbumSource, RemoteError};
use crate::config::{DEFAULT_BBOX_HALF_EXTENT, DEFAULT_MAX_ALBUM_SIZE};
use crate::models::Coordinate;

/// The search API only reliably serves the first 4000 results
/// (16 pages at the default page size).
pub const MAX_RELIABLE_PAGE: u32 = 16;

/// Pick a page uniformly from `1..=min(pages, MAX_RELIABLE_PAGE)`.
/// `pages` must be at least 1.
pub fn pick_page<R: Rng + ?Sized>(pages: u32, rng: &mut R) -> u32 {
    rng.gen_range(1..=pages.clamp(1, MAX_RELIABLE_PAGE))
}

/// Sample up to `max` records uniformly without replacement and map them
/// to their medium URLs. Records without a URL are skipped, duplicates
/// are dropped.
pub fn select_urls<R: Rng + ?Sized>(records: &[PhotoRecord], max: usize, rng: &mut R) -> Vec<String> {
    let amount = max.min(records.len());
    let picked = rand::seq::index::sample(rng, records.len(), amount);

    let mut seen = HashSet::new();
    let mut urls = Vec::with_capacity(amount);
    for idx in picked.iter() {
        if let Some(url) = records[idx].url_m.as_deref() {
            if !url.is_empty() && seen.insert(url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// `AlbumSource` built on any paginated photo search.
pub struct SearchAlbumSource<S> {
    search: S,
    max_album_size: usize,
    half_width: f64,
    half_height: f64,
}

impl<S: PhotoSearch> SearchAlbumSource<S> {
    pub fn new(search: S) -> Self {
        Self {
            search,
            max_album_size: DEFAULT_MAX_ALBUM_SIZE,
            half_width: DEFAULT_BBOX_HALF_EXTENT,
            half_height: DEFAULT_BBOX_HALF_EXTENT,
        }
    }

    pub fn with_max_album_size(mut self, max: usize) -> Self {
        self.max_album_size = max;
        self
    }

    pub fn with_search_extent(mut self, half_width: f64, half_height: f64) -> Self {
        self.half_width = half_width;
        self.half_height = half_height;
        self
    }
}

#[async_trait]
impl<S: PhotoSearch> AlbumSource for SearchAlbumSource<S> {
    async fn fetch_album_urls(&self, coordinate: Coordinate) -> Result<Vec<String>, RemoteError> {
        let bbox = BoundingBox::around(coordinate, self.half_width, self.half_height);

        let first = self.search.search(&bbox, None).await?;
        if first.pages == 0 {
            return Err(RemoteError::NoResults);
        }

        let page = pick_page(first.pages, &mut rand::thread_rng());
        debug!(%bbox, pages = first.pages, page = page, "Selected result page");

        let chosen = self.search.search(&bbox, Some(page)).await?;
        if chosen.photo.is_empty() {
            return Err(RemoteError::NoResults);
        }

        let urls = select_urls(&chosen.photo, self.max_album_size, &mut rand::thread_rng());
        debug!(records = chosen.photo.len(), urls = urls.len(), "Sampled album URLs");
        Ok(urls)
    }
}
