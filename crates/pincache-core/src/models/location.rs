//! Pin (location) model and coordinate validation.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Valid latitude range in degrees.
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);

/// Valid longitude range in degrees.
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A WGS84 coordinate. Construction through `new` guarantees both
/// components are finite and inside their valid ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let lat_ok = latitude.is_finite()
            && latitude >= LATITUDE_RANGE.0
            && latitude <= LATITUDE_RANGE.1;
        let long_ok = longitude.is_finite()
            && longitude >= LONGITUDE_RANGE.0
            && longitude <= LONGITUDE_RANGE.1;
        if lat_ok && long_ok {
            Some(Self { latitude, longitude })
        } else {
            None
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// A user-placed map pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub coordinate: Coordinate,
    /// Place name, filled in later by reverse geocoding.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Store-wide insertion sequence, used as a stable tie-breaker.
    pub seq: u64,
}

impl Location {
    /// Display ordering: by latitude, then by creation order.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        self.coordinate
            .latitude
            .total_cmp(&other.coordinate.latitude)
            .then(self.seq.cmp(&other.seq))
    }

    /// Title for display, falling back to the coordinate.
    pub fn display_title(&self) -> String {
        match self.title {
            Some(ref title) if !title.is_empty() => title.clone(),
            _ => self.coordinate.to_string(),
        }
    }
}
