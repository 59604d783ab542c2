//! Flickr REST API client.
//!
//! Implements `PhotoSearch` over `flickr.photos.search` and `ImageFetcher`
//! for downloading the returned images, sharing one connection pool.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::search::{parse_search_response, BoundingBox, PhotoSearch, SearchPage};
use super::{ImageFetcher, RemoteError};

// ============================================================================
// Constants
// ============================================================================

/// Base URL for the Flickr REST endpoint
const API_BASE_URL: &str = "https://api.flickr.com/services/rest";

const SEARCH_METHOD: &str = "flickr.photos.search";

/// Extra field holding the medium-resolution image URL
const MEDIUM_URL_EXTRA: &str = "url_m";

const RESPONSE_FORMAT: &str = "json";

/// API client for Flickr.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct FlickrClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FlickrClient {
    /// Create a new client. Every request is bounded by `timeout`.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Point the client at another endpoint (e.g. a local stub server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_params(&self, bbox: &BoundingBox, page: Option<u32>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("method", SEARCH_METHOD.to_string()),
            ("api_key", self.api_key.clone()),
            ("safe_search", "1".to_string()),
            ("extras", MEDIUM_URL_EXTRA.to_string()),
            ("format", RESPONSE_FORMAT.to_string()),
            ("nojsoncallback", "1".to_string()),
            ("bbox", bbox.to_string()),
        ];
        if let Some(page) = page {
            params.push(("page", page.to_string()));
        }
        params
    }

    fn search_url(&self, bbox: &BoundingBox, page: Option<u32>) -> Result<Url, RemoteError> {
        Url::parse_with_params(&self.base_url, &self.search_params(bbox, page))
            .map_err(|e| RemoteError::Transport(format!("Invalid search URL: {}", e)))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl PhotoSearch for FlickrClient {
    async fn search(&self, bbox: &BoundingBox, page: Option<u32>) -> Result<SearchPage, RemoteError> {
        let url = self.search_url(bbox, page)?;
        debug!(%bbox, ?page, "Searching photos");

        let response = self.client.get(url).send().await?;
        let response = Self::check_response(response).await?;
        let body = response.text().await?;
        parse_search_response(&body)
    }
}

#[async_trait]
impl ImageFetcher for FlickrClient {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.client.get(url).send().await?;
        let response = Self::check_response(response).await?;
        let bytes = response.bytes().await?;
        debug!(url = url, bytes = bytes.len(), "Downloaded image");
        Ok(bytes.to_vec())
    }
}
