//! SQLite-backed durable tier.
//!
//! The durable tier is never read during normal operation: it is loaded
//! once at startup to seed the fast tier, and afterwards only receives
//! drained change sets from `Store::flush`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use super::fast::ChangeSet;
use super::migrations;
use super::StoreError;
use crate::models::{Coordinate, Location, LocationId, Photo, PhotoId};

pub(crate) struct DurableTier {
    conn: Mutex<Connection>,
}

impl DurableTier {
    /// Open or create the database file, then migrate it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::DurablePersistence(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened database");
        Self::initialize(conn)
    }

    /// Open a private in-memory database (for tests and ephemeral sessions).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read every stored row.
    pub fn load(&self) -> Result<(Vec<Location>, Vec<Photo>), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut stmt = conn.prepare(
            "SELECT id, latitude, longitude, title, created_at, seq FROM locations ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut locations = Vec::with_capacity(rows.len());
        for (id, latitude, longitude, title, created_at, seq) in rows {
            let coordinate = Coordinate::new(latitude, longitude).ok_or_else(|| {
                StoreError::CorruptRow {
                    table: "locations",
                    detail: format!("id {}: coordinate ({}, {}) out of range", id, latitude, longitude),
                }
            })?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::CorruptRow {
                    table: "locations",
                    detail: format!("id {}: created_at: {}", id, e),
                })?
                .with_timezone(&Utc);
            locations.push(Location {
                id: LocationId(id),
                coordinate,
                title,
                created_at,
                seq: seq as u64,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, location_id, image_data, source_url, seq FROM photos ORDER BY seq",
        )?;
        let photos = stmt
            .query_map([], |row| {
                Ok(Photo {
                    id: PhotoId(row.get(0)?),
                    location_id: LocationId(row.get(1)?),
                    payload: row.get::<_, Option<Vec<u8>>>(2)?.map(Arc::from),
                    source_url: row.get(3)?,
                    seq: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(locations = locations.len(), photos = photos.len(), "Loaded durable rows");
        Ok((locations, photos))
    }

    /// Write one change set inside a single SQLite transaction.
    pub fn apply(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn.transaction()?;
        {
            let mut delete_photo = tx.prepare_cached("DELETE FROM photos WHERE id = ?1")?;
            for id in &changes.deleted_photos {
                delete_photo.execute(params![id.0])?;
            }

            let mut delete_location = tx.prepare_cached("DELETE FROM locations WHERE id = ?1")?;
            for id in &changes.deleted_locations {
                delete_location.execute(params![id.0])?;
            }

            let mut upsert_location = tx.prepare_cached(
                "INSERT INTO locations (id, latitude, longitude, title, created_at, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    title = excluded.title",
            )?;
            for location in &changes.locations {
                upsert_location.execute(params![
                    location.id.0,
                    location.coordinate.latitude,
                    location.coordinate.longitude,
                    location.title,
                    location.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    location.seq as i64,
                ])?;
            }

            let mut upsert_photo = tx.prepare_cached(
                "INSERT INTO photos (id, location_id, image_data, source_url, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    image_data = excluded.image_data,
                    source_url = excluded.source_url",
            )?;
            for photo in &changes.photos {
                upsert_photo.execute(params![
                    photo.id.0,
                    photo.location_id.0,
                    photo.payload.as_deref(),
                    photo.source_url,
                    photo.seq as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_location() -> Location {
        Location {
            id: LocationId(1),
            coordinate: Coordinate::new(47.4108, 8.5586).unwrap(),
            title: Some("Zurich".to_string()),
            created_at: Utc::now(),
            seq: 1,
        }
    }

    #[test]
    fn test_apply_then_load_round_trip() {
        let tier = DurableTier::open_in_memory().unwrap();
        let location = sample_location();
        let photo = Photo {
            id: PhotoId(7),
            location_id: location.id,
            payload: Some(Arc::from(vec![1u8, 2, 3])),
            source_url: Some("https://farm.example/1_m.jpg".to_string()),
            seq: 2,
        };
        let placeholder = Photo {
            id: PhotoId(8),
            location_id: location.id,
            payload: None,
            source_url: None,
            seq: 3,
        };

        tier.apply(&ChangeSet {
            locations: vec![location.clone()],
            photos: vec![photo.clone(), placeholder.clone()],
            ..ChangeSet::default()
        })
        .unwrap();

        let (locations, photos) = tier.load().unwrap();
        assert_eq!(locations, vec![location]);
        assert_eq!(photos, vec![photo, placeholder]);
    }

    #[test]
    fn test_location_delete_cascades_in_database() {
        let tier = DurableTier::open_in_memory().unwrap();
        let location = sample_location();
        tier.apply(&ChangeSet {
            locations: vec![location.clone()],
            photos: vec![Photo {
                id: PhotoId(1),
                location_id: location.id,
                payload: Some(Arc::from(vec![0u8])),
                source_url: None,
                seq: 2,
            }],
            ..ChangeSet::default()
        })
        .unwrap();

        tier.apply(&ChangeSet {
            deleted_locations: vec![location.id],
            ..ChangeSet::default()
        })
        .unwrap();

        let (locations, photos) = tier.load().unwrap();
        assert!(locations.is_empty());
        assert!(photos.is_empty());
    }

    #[test]
    fn test_orphan_photo_write_fails() {
        let tier = DurableTier::open_in_memory().unwrap();
        let result = tier.apply(&ChangeSet {
            photos: vec![Photo {
                id: PhotoId(1),
                location_id: LocationId(99),
                payload: None,
                source_url: None,
                seq: 1,
            }],
            ..ChangeSet::default()
        });
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert!(tier.load().unwrap().1.is_empty());
    }
}
