//! Database schema.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry of
//! [`MIGRATIONS`] moves the database up by one version; a fresh database
//! runs all of them.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Ordered migration steps. Step `n` upgrades version `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    // 1: one row per sensor. `key` is "unsent_" + sensor name and `records`
    // a JSON array of { "timeStamp", "value" } objects in insertion order.
    r#"
    CREATE TABLE pending (
        key TEXT PRIMARY KEY,
        records TEXT NOT NULL
    );
    "#,
];

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &mut Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    for (step, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let target = step as i32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        tracing::debug!(version = target, "Applied schema migration");
    }

    Ok(())
}

fn user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}
