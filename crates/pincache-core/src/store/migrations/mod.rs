//! Schema migrations for the durable tier, keyed by `PRAGMA user_version`.
//!
//! Migrations are additive only: later versions add tables or columns and
//! never rewrite or drop existing rows.

mod v001_initial;
mod v002_titles_and_sources;

use rusqlite::Connection;
use tracing::{info, warn};

use super::StoreError;

type Migration = fn(&Connection) -> Result<(), StoreError>;

const MIGRATIONS: &[(u32, Migration)] = &[
    (1, v001_initial::migrate),
    (2, v002_titles_and_sources::migrate),
];

/// Newest schema version this build knows about.
pub const LATEST_VERSION: u32 = 2;

pub fn schema_version(conn: &Connection) -> Result<u32, StoreError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema up to `LATEST_VERSION`, one transaction per step.
pub fn run_migrations(conn: &Connection) -> Result<u32, StoreError> {
    let current = schema_version(conn)?;
    if current > LATEST_VERSION {
        warn!(
            found = current,
            latest = LATEST_VERSION,
            "Database was written by a newer build"
        );
    }
    for (version, migrate) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        migrate(&tx)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version = version, "Applied schema migration");
    }
    schema_version(conn)
}
