//! Last-viewed map region.

use serde::{Deserialize, Serialize};

/// Map viewport persisted between runs.
///
/// Serialized as a flat key/value record; there is no version field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    #[serde(rename = "latCenter")]
    pub center_latitude: f64,
    #[serde(rename = "longCenter")]
    pub center_longitude: f64,
    #[serde(rename = "latDelta")]
    pub latitude_delta: f64,
    #[serde(rename = "longDelta")]
    pub longitude_delta: f64,
}
