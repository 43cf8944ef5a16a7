//! # SQLite Store
//!
//! Local storage for GPS history and per-subject attachments, usable as both
//! collaborators of [`LocationEngine`](crate::LocationEngine).
//!
//! ## Tables
//!
//! - `gps_readings`: one row per fix, indexed by `(subject_id, timestamp)`
//! - `attachments`: one row per `(subject_id, key)`, body stored as a
//!   MessagePack blob

use rusqlite::{params, Connection, Result as SqlResult};
use serde_json::Value;

use log::{debug, info};

use crate::{AttachmentStore, GpsReading, GpsSource, LocationError, Result};

/// SQLite-backed GPS source and attachment store.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a database at `db_path`.
    pub fn new(db_path: &str) -> SqlResult<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteStore] Opened {}", db_path);
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqlResult<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS gps_readings (
                subject_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_gps_readings_subject_time
                ON gps_readings(subject_id, timestamp);

            CREATE TABLE IF NOT EXISTS attachments (
                subject_id TEXT NOT NULL,
                key TEXT NOT NULL,
                body BLOB NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (subject_id, key)
            );
            "#,
        )
    }

    // ========================================================================
    // GPS History
    // ========================================================================

    /// Append readings for a subject in one transaction.
    pub fn insert_readings(&mut self, subject_id: &str, readings: &[GpsReading]) -> SqlResult<()> {
        let tx = self.db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO gps_readings (subject_id, timestamp, latitude, longitude)
                 VALUES (?, ?, ?, ?)",
            )?;
            for r in readings {
                stmt.execute(params![subject_id, r.timestamp, r.latitude, r.longitude])?;
            }
        }
        tx.commit()?;

        debug!(
            "[SqliteStore] Inserted {} readings for {}",
            readings.len(),
            subject_id
        );
        Ok(())
    }

    /// Number of readings stored for a subject.
    pub fn reading_count(&self, subject_id: &str) -> SqlResult<usize> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM gps_readings WHERE subject_id = ?",
            params![subject_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove a subject's readings and attachments.
    pub fn clear_subject(&mut self, subject_id: &str) -> SqlResult<()> {
        let tx = self.db.transaction()?;
        tx.execute(
            "DELETE FROM gps_readings WHERE subject_id = ?",
            params![subject_id],
        )?;
        tx.execute(
            "DELETE FROM attachments WHERE subject_id = ?",
            params![subject_id],
        )?;
        tx.commit()?;

        info!("[SqliteStore] Cleared {}", subject_id);
        Ok(())
    }
}

impl GpsSource for SqliteStore {
    fn fetch(&self, subject_id: &str, start: i64, end: i64) -> Result<Vec<GpsReading>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let mut stmt = self.db.prepare(
            "SELECT timestamp, latitude, longitude FROM gps_readings
             WHERE subject_id = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp, rowid",
        )?;
        let readings = stmt
            .query_map(params![subject_id, start, end], |row| {
                Ok(GpsReading::new(row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(readings)
    }
}

impl AttachmentStore for SqliteStore {
    fn get(&self, subject_id: &str, key: &str) -> Result<Option<Value>> {
        let mut stmt = self
            .db
            .prepare("SELECT body FROM attachments WHERE subject_id = ? AND key = ?")?;
        let mut rows = stmt.query(params![subject_id, key])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let body: Vec<u8> = row.get(0)?;
        let value = rmp_serde::from_slice(&body).map_err(|e| LocationError::AttachmentStore {
            subject_id: subject_id.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    fn set(&self, subject_id: &str, key: &str, value: &Value) -> Result<()> {
        let body = rmp_serde::to_vec(value).map_err(|e| LocationError::Serialization {
            message: e.to_string(),
        })?;
        self.db.execute(
            "INSERT OR REPLACE INTO attachments (subject_id, key, body, updated_at)
             VALUES (?, ?, ?, strftime('%s', 'now'))",
            params![subject_id, key, body],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExtractionMethod, LocationConfig, LocationEngine, REDUCED_ATTACHMENT_KEY};
    use serde_json::json;

    fn sample_readings() -> Vec<GpsReading> {
        (0..20)
            .map(|i| GpsReading::new(i * 60_000, 51.5074, -0.1278))
            .collect()
    }

    #[test]
    fn test_create_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.reading_count("U1").unwrap(), 0);
    }

    #[test]
    fn test_fetch_window() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.insert_readings("U1", &sample_readings()).unwrap();
        store
            .insert_readings("U2", &[GpsReading::new(0, 1.0, 1.0)])
            .unwrap();

        assert_eq!(store.reading_count("U1").unwrap(), 20);
        let readings = store.fetch("U1", 60_000, 180_000).unwrap();
        let timestamps: Vec<i64> = readings.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![60_000, 120_000]);

        assert!(store.fetch("U1", 60_000, 60_000).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_sorts_out_of_order_inserts() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .insert_readings(
                "U1",
                &[GpsReading::new(3000, 3.0, 3.0), GpsReading::new(1000, 1.0, 1.0)],
            )
            .unwrap();
        let readings = store.fetch("U1", 0, 10_000).unwrap();
        assert_eq!(readings[0].timestamp, 1000);
        assert_eq!(readings[1].latitude, 3.0);
    }

    #[test]
    fn test_attachment_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get("U1", "key").unwrap().is_none());

        let body = json!({"end": 1000, "data": [{"latitude": 1.5, "longitude": -2.5, "count": 3}]});
        store.set("U1", "key", &body).unwrap();
        assert_eq!(store.get("U1", "key").unwrap(), Some(body));

        store.set("U1", "key", &json!({"end": 2000, "data": []})).unwrap();
        assert_eq!(store.get("U1", "key").unwrap().unwrap()["end"], 2000);
    }

    #[test]
    fn test_clear_subject() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.insert_readings("U1", &sample_readings()).unwrap();
        store.set("U1", "key", &json!(1)).unwrap();

        store.clear_subject("U1").unwrap();
        assert_eq!(store.reading_count("U1").unwrap(), 0);
        assert!(store.get("U1", "key").unwrap().is_none());
    }

    #[test]
    fn test_engine_over_sqlite() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.insert_readings("U1", &sample_readings()).unwrap();

        let config = LocationConfig {
            method: ExtractionMethod::DensityPartition,
            min_points: 2,
            ..LocationConfig::default()
        };
        let engine = LocationEngine::new(&store, &store, config);
        let locations = engine.significant_locations("U1", 0, 1_200_000).unwrap();

        assert_eq!(locations.len(), 1);
        assert!((locations[0].proportion - 1.0).abs() < 1e-12);
        assert!(store.get("U1", REDUCED_ATTACHMENT_KEY).unwrap().is_some());
    }
}
