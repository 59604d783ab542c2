//! v002: geocoded location titles, photo source URLs.

use rusqlite::Connection;

use crate::store::StoreError;

pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        ALTER TABLE locations ADD COLUMN title TEXT;
        ALTER TABLE photos ADD COLUMN source_url TEXT;
        ",
    )?;
    Ok(())
}
