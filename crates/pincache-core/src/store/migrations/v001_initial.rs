//! v001: locations, photos.

use rusqlite::Connection;

use crate::store::StoreError;

pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS locations (
            id          INTEGER PRIMARY KEY,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL,
            created_at  TEXT NOT NULL,
            seq         INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS photos (
            id          INTEGER PRIMARY KEY,
            location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
            image_data  BLOB,
            seq         INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_photos_location ON photos(location_id);
        ",
    )?;
    Ok(())
}
