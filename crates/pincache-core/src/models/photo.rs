//! Album photo model.

use std::fmt;
use std::sync::Arc;

use super::LocationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhotoId(pub i64);

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One album image belonging to exactly one `Location`.
///
/// A photo without a payload is a placeholder whose download is pending.
/// Payloads are shared, so cloning a `Photo` never copies image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: PhotoId,
    pub location_id: LocationId,
    pub payload: Option<Arc<[u8]>>,
    pub source_url: Option<String>,
    /// Store-wide insertion sequence; photos have no intrinsic rank.
    pub seq: u64,
}

impl Photo {
    pub fn is_placeholder(&self) -> bool {
        self.payload.is_none()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_has_no_payload() {
        let mut photo = Photo {
            id: PhotoId(1),
            location_id: LocationId(1),
            payload: None,
            source_url: Some("https://live.example/1_m.jpg".to_string()),
            seq: 0,
        };
        assert!(photo.is_placeholder());
        assert_eq!(photo.payload_len(), 0);

        photo.payload = Some(Arc::from(&b"jpeg"[..]));
        assert!(!photo.is_placeholder());
        assert_eq!(photo.payload_len(), 4);
    }
}
