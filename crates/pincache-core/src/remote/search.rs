//! Photo search wire types and the transport seam.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use super::RemoteError;
use crate::models::location::{LATITUDE_RANGE, LONGITUDE_RANGE};
use crate::models::Coordinate;

/// Search area as sent to the API: `left,bottom,right,top` in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl BoundingBox {
    /// Box of `half_width` x `half_height` degrees around `center`,
    /// clamped to valid latitude/longitude ranges.
    pub fn around(center: Coordinate, half_width: f64, half_height: f64) -> Self {
        Self {
            left: (center.longitude - half_width).max(LONGITUDE_RANGE.0),
            bottom: (center.latitude - half_height).max(LATITUDE_RANGE.0),
            right: (center.longitude + half_width).min(LONGITUDE_RANGE.1),
            top: (center.latitude + half_height).min(LATITUDE_RANGE.1),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.left, self.bottom, self.right, self.top)
    }
}

/// One page of search results.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    /// Total number of result pages for the query.
    pub pages: u32,
    pub photo: Vec<PhotoRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoRecord {
    /// Medium-resolution image URL, present only when requested as an extra.
    #[serde(default)]
    pub url_m: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    photos: Option<SearchPage>,
    #[serde(default)]
    stat: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse a search response body. Anything but `{"photos": {"pages", "photo"}}`
/// is a parse error.
pub fn parse_search_response(body: &str) -> Result<SearchPage, RemoteError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| RemoteError::Parse(format!("Failed to parse search response: {}", e)))?;
    match response.photos {
        Some(page) => Ok(page),
        None => Err(RemoteError::Parse(format!(
            "missing photos object (stat: {}, message: {})",
            response.stat.as_deref().unwrap_or("none"),
            response.message.as_deref().unwrap_or("none"),
        ))),
    }
}

/// Transport for a paginated, bounding-box photo search.
#[async_trait]
pub trait PhotoSearch: Send + Sync {
    /// Query one page (or the default first page when `page` is `None`).
    async fn search(&self, bbox: &BoundingBox, page: Option<u32>) -> Result<SearchPage, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_string_format() {
        let bbox = BoundingBox::around(Coordinate::new(10.0, 20.0).unwrap(), 0.5, 0.25);
        assert_eq!(bbox.to_string(), "19.5,9.75,20.5,10.25");
    }

    #[test]
    fn test_bbox_clamped_at_poles_and_antimeridian() {
        let bbox = BoundingBox::around(Coordinate::new(89.995, -179.995).unwrap(), 0.01, 0.01);
        assert_eq!(bbox.left, -180.0);
        assert_eq!(bbox.top, 90.0);
        assert!(bbox.right > -180.0);
        assert!(bbox.bottom < 90.0);
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
            "photos": {
                "page": 1, "pages": 3, "perpage": 250, "total": "700",
                "photo": [
                    {"id": "1", "title": "a", "url_m": "https://live.example/1_m.jpg"},
                    {"id": "2", "title": "b"}
                ]
            },
            "stat": "ok"
        }"#;
        let page = parse_search_response(body).unwrap();
        assert_eq!(page.pages, 3);
        assert_eq!(page.photo.len(), 2);
        assert_eq!(page.photo[0].url_m.as_deref(), Some("https://live.example/1_m.jpg"));
        assert!(page.photo[1].url_m.is_none());
    }

    #[test]
    fn test_record_fields_besides_url_are_ignored() {
        let body = r#"{
            "photos": {
                "pages": 1,
                "photo": [
                    {"id": 52011, "owner": null, "url_m": "https://live.example/52011_m.jpg"},
                    {"id": ["odd"], "url_m": null}
                ]
            }
        }"#;
        let page = parse_search_response(body).unwrap();
        assert_eq!(page.photo.len(), 2);
        assert_eq!(page.photo[0].url_m.as_deref(), Some("https://live.example/52011_m.jpg"));
        assert!(page.photo[1].url_m.is_none());
    }

    #[test]
    fn test_parse_api_failure_is_parse_error() {
        let body = r#"{"stat": "fail", "code": 100, "message": "Invalid API Key"}"#;
        let err = parse_search_response(body).unwrap_err();
        assert!(matches!(err, RemoteError::Parse(ref msg) if msg.contains("Invalid API Key")));
    }

    #[test]
    fn test_parse_wrong_shapes() {
        for body in [
            "not json",
            r#"{"photos": {"photo": []}}"#,
            r#"{"photos": {"pages": 2}}"#,
            r#"{"photos": {"pages": "two", "photo": []}}"#,
            r#"[1, 2, 3]"#,
        ] {
            assert!(
                matches!(parse_search_response(body), Err(RemoteError::Parse(_))),
                "body should fail: {}",
                body
            );
        }
    }
}
