//! Main store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use fsrlink_types::{PendingRecord, SensorName};

use crate::error::{Error, Result};
use crate::schema;

/// SQLite-backed store of readings that could not be delivered.
///
/// Records are grouped by sensor under the key `"unsent_" + sensor_name` and
/// kept in insertion order within each sensor. Every read-modify-write runs
/// as one `IMMEDIATE` transaction behind a mutex, so appends from concurrent
/// delivery tasks never overwrite each other.
pub struct PendingStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for PendingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingStore").finish_non_exhaustive()
    }
}

impl PendingStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening pending store at {}", path.display());
        let mut conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::initialize(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction rolls back when the transaction drops, so
        // the connection is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record after any already pending for `sensor`.
    ///
    /// Returns the number of records now pending for that sensor.
    pub fn append(&self, sensor: &SensorName, record: &PendingRecord) -> Result<usize> {
        self.append_all(sensor, std::slice::from_ref(record))
    }

    /// Append several records, keeping their order, in one transaction.
    pub fn append_all(&self, sensor: &SensorName, records: &[PendingRecord]) -> Result<usize> {
        let key = sensor.pending_key();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut pending = load(&tx, &key)?;
        if records.is_empty() {
            return Ok(pending.len());
        }
        pending.extend_from_slice(records);
        save(&tx, &key, &pending)?;
        tx.commit()?;

        debug!(
            sensor = %sensor,
            added = records.len(),
            pending = pending.len(),
            "Stored undelivered records"
        );
        Ok(pending.len())
    }

    /// Return every record pending for `sensor` and clear them.
    pub fn drain(&self, sensor: &SensorName) -> Result<Vec<PendingRecord>> {
        let key = sensor.pending_key();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let records = load(&tx, &key)?;
        tx.execute("DELETE FROM pending WHERE key = ?1", [&key])?;
        tx.commit()?;

        if !records.is_empty() {
            debug!(sensor = %sensor, drained = records.len(), "Drained pending records");
        }
        Ok(records)
    }

    /// Remove the oldest `n` records pending for `sensor`.
    ///
    /// Records appended after the caller read the front are kept. Returns
    /// the number of records still pending for that sensor.
    pub fn remove_front(&self, sensor: &SensorName, n: usize) -> Result<usize> {
        let key = sensor.pending_key();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut pending = load(&tx, &key)?;
        let removed = n.min(pending.len());
        if removed == 0 {
            return Ok(pending.len());
        }
        pending.drain(..removed);
        save(&tx, &key, &pending)?;
        tx.commit()?;

        debug!(
            sensor = %sensor,
            removed,
            pending = pending.len(),
            "Removed delivered records"
        );
        Ok(pending.len())
    }

    /// Records pending for `sensor`, without clearing them.
    pub fn peek(&self, sensor: &SensorName) -> Result<Vec<PendingRecord>> {
        let conn = self.conn();
        load(&conn, &sensor.pending_key())
    }

    /// Number of records pending for `sensor`.
    pub fn count(&self, sensor: &SensorName) -> Result<usize> {
        let conn = self.conn();
        let count: Option<i64> = conn
            .query_row(
                "SELECT json_array_length(records) FROM pending WHERE key = ?1",
                [sensor.pending_key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.map_or(0, |c| usize::try_from(c).unwrap_or(0)))
    }

    /// Per-sensor record counts, ordered by sensor name.
    ///
    /// Keys that do not belong to a valid sensor name are skipped.
    pub fn pending_counts(&self) -> Result<Vec<(SensorName, usize)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, json_array_length(records) FROM pending
             WHERE json_array_length(records) > 0",
        )?;

        let mut counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|row| match row {
                Ok((key, count)) => SensorName::from_pending_key(&key)
                    .map(|name| Ok((name, usize::try_from(count).unwrap_or(0)))),
                Err(e) => Some(Err(e)),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        counts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(counts)
    }

    /// Sensors that currently have records pending, sorted.
    pub fn pending_sensors(&self) -> Result<Vec<SensorName>> {
        Ok(self
            .pending_counts()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Total number of pending records across all sensors.
    pub fn total(&self) -> Result<usize> {
        let conn = self.conn();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(json_array_length(records)), 0) FROM pending",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(total).unwrap_or(0))
    }
}

fn load(conn: &Connection, key: &str) -> Result<Vec<PendingRecord>> {
    let raw: Option<String> = conn
        .query_row("SELECT records FROM pending WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;

    match raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|source| Error::Serialization {
            key: key.to_string(),
            source,
        }),
        None => Ok(Vec::new()),
    }
}

/// Replace the records under `key`, dropping the row once nothing is left.
fn save(conn: &Connection, key: &str, records: &[PendingRecord]) -> Result<()> {
    if records.is_empty() {
        conn.execute("DELETE FROM pending WHERE key = ?1", [key])?;
        return Ok(());
    }

    let encoded = serde_json::to_string(records).map_err(|source| Error::Serialization {
        key: key.to_string(),
        source,
    })?;
    conn.execute(
        "INSERT INTO pending (key, records) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET records = excluded.records",
        rusqlite::params![key, encoded],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use time::macros::datetime;

    fn sensor(name: &str) -> SensorName {
        SensorName::parse(name).unwrap()
    }

    fn record(value: f64) -> PendingRecord {
        PendingRecord {
            time_stamp: datetime!(2024-03-01 12:00:00 UTC),
            value,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = PendingStore::open_in_memory().unwrap();
        assert_eq!(store.total().unwrap(), 0);
        assert!(store.pending_sensors().unwrap().is_empty());
    }

    #[test]
    fn test_drain_returns_then_clears() {
        let store = PendingStore::open_in_memory().unwrap();
        let fsr2 = sensor("FSR2");

        store.append(&fsr2, &record(7.0)).unwrap();

        assert_eq!(store.drain(&fsr2).unwrap(), vec![record(7.0)]);
        assert!(store.drain(&fsr2).unwrap().is_empty());
    }

    #[test]
    fn test_append_keeps_insertion_order() {
        let store = PendingStore::open_in_memory().unwrap();
        let fsr1 = sensor("FSR1");

        assert_eq!(store.append(&fsr1, &record(3.0)).unwrap(), 1);
        assert_eq!(store.append(&fsr1, &record(1.0)).unwrap(), 2);
        assert_eq!(
            store.append_all(&fsr1, &[record(2.0), record(0.5)]).unwrap(),
            4
        );

        let values: Vec<f64> = store.peek(&fsr1).unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 1.0, 2.0, 0.5]);
        assert_eq!(store.count(&fsr1).unwrap(), 4);
    }

    #[test]
    fn test_sensors_are_independent() {
        let store = PendingStore::open_in_memory().unwrap();
        store.append(&sensor("FSR3"), &record(1.0)).unwrap();
        store.append(&sensor("FSR1"), &record(2.0)).unwrap();
        store.append(&sensor("FSR3"), &record(3.0)).unwrap();

        assert_eq!(
            store.pending_counts().unwrap(),
            vec![(sensor("FSR1"), 1), (sensor("FSR3"), 2)]
        );
        assert_eq!(store.total().unwrap(), 3);

        store.drain(&sensor("FSR3")).unwrap();
        assert_eq!(store.pending_sensors().unwrap(), vec![sensor("FSR1")]);
        assert_eq!(store.count(&sensor("FSR3")).unwrap(), 0);
    }

    #[test]
    fn test_stored_layout() {
        let store = PendingStore::open_in_memory().unwrap();
        store.append(&sensor("FSR2"), &record(7.0)).unwrap();

        let (key, raw): (String, String) = store
            .conn()
            .query_row("SELECT key, records FROM pending", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();

        assert_eq!(key, "unsent_FSR2");
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["timeStamp"], "2024-03-01T12:00:00Z");
        assert_eq!(json[0]["value"], 7.0);
    }

    #[test]
    fn test_remove_front_keeps_the_rest() {
        let store = PendingStore::open_in_memory().unwrap();
        let fsr4 = sensor("FSR4");
        store
            .append_all(&fsr4, &[record(1.0), record(2.0), record(3.0)])
            .unwrap();

        assert_eq!(store.remove_front(&fsr4, 1).unwrap(), 2);
        // Appended after the front was read
        store.append(&fsr4, &record(4.0)).unwrap();
        assert_eq!(store.remove_front(&fsr4, 1).unwrap(), 2);

        let values: Vec<f64> = store.peek(&fsr4).unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 4.0]);
    }

    #[test]
    fn test_remove_front_past_the_end_clears_the_row() {
        let store = PendingStore::open_in_memory().unwrap();
        let fsr4 = sensor("FSR4");
        store.append(&fsr4, &record(1.0)).unwrap();

        assert_eq!(store.remove_front(&fsr4, 5).unwrap(), 0);
        assert_eq!(store.remove_front(&sensor("FSR9"), 1).unwrap(), 0);

        let rows: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
        assert!(store.pending_sensors().unwrap().is_empty());
    }

    #[test]
    fn test_append_nothing_leaves_no_row() {
        let store = PendingStore::open_in_memory().unwrap();
        assert_eq!(store.append_all(&sensor("FSR5"), &[]).unwrap(), 0);
        assert!(store.pending_sensors().unwrap().is_empty());
    }

    #[test]
    fn test_unrelated_keys_are_ignored() {
        let store = PendingStore::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO pending (key, records) VALUES ('settings', '[]'), ('unsent_temp', '[{}]')",
                [],
            )
            .unwrap();
        store.append(&sensor("FSR0"), &record(1.0)).unwrap();

        assert_eq!(store.pending_sensors().unwrap(), vec![sensor("FSR0")]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pending.db");

        {
            let store = PendingStore::open(&path).unwrap();
            store.append(&sensor("FSR4"), &record(4.5)).unwrap();
        }

        let store = PendingStore::open(&path).unwrap();
        assert_eq!(store.drain(&sensor("FSR4")).unwrap(), vec![record(4.5)]);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PendingStore::open(dir.path().join("pending.db")).unwrap());
        let fsr1 = sensor("FSR1");

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                let fsr1 = fsr1.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .append(&fsr1, &record(f64::from(worker * 100 + i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = store.drain(&fsr1).unwrap();
        assert_eq!(records.len(), 200);

        // Each worker's records stay in its own order
        for worker in 0..8 {
            let mine: Vec<f64> = records
                .iter()
                .map(|r| r.value)
                .filter(|v| (*v as i32) / 100 == worker)
                .collect();
            let expected: Vec<f64> = (0..25).map(|i| f64::from(worker * 100 + i)).collect();
            assert_eq!(mine, expected);
        }
    }
}
