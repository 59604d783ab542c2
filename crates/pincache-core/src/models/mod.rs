//! Data models for pins and their photo albums.
//!
//! - `Location`: a user-placed map pin, owner of an album
//! - `Photo`: one album image (or a pending placeholder row)
//! - `Coordinate`: validated WGS84 latitude/longitude pair
//! - `Viewport`: last-viewed map region, persisted as a user preference

pub mod location;
pub mod photo;
pub mod viewport;

pub use location::{Coordinate, Location, LocationId};
pub use photo::{Photo, PhotoId};
pub use viewport::Viewport;

/// Which entity table a change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Location,
    Photo,
}

/// Identifier of any stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Location(LocationId),
    Photo(PhotoId),
}

impl EntityId {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityId::Location(_) => EntityKind::Location,
            EntityId::Photo(_) => EntityKind::Photo,
        }
    }
}

impl From<LocationId> for EntityId {
    fn from(id: LocationId) -> Self {
        EntityId::Location(id)
    }
}

impl From<PhotoId> for EntityId {
    fn from(id: PhotoId) -> Self {
        EntityId::Photo(id)
    }
}
