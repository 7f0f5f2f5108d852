//! Persistence sink for scored records
//!
//! Table written: `scored_events` (one row per enriched event, with TTL).
//!
//! Batch inserts run in a single transaction: a failure rolls back that batch
//! only. Expired rows are removed by the sweeper through `delete_expired`.

use super::error::StoreError;
use super::types::{GeoPoint, Region, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scored_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL,
    text TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    region TEXT,
    observed_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    sentiment_score REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scored_events_expires ON scored_events(expires_at);
"#;

/// Trait for the record sink the aggregation stage and sweeper write to
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert all records atomically; returns rows written
    async fn insert_batch(&self, records: &[StoredRecord]) -> Result<usize, StoreError>;

    /// Delete every record with `expires_at < now`; returns rows deleted
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Most recently inserted records first
    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError>;

    async fn insert(&self, record: &StoredRecord) -> Result<(), StoreError> {
        self.insert_batch(std::slice::from_ref(record)).await.map(|_| ())
    }
}

/// Apply WAL and the usual write-friendly pragmas
pub fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Create tables and indexes (idempotent)
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// SQLite implementation of RecordStore
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database file and ensure the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ SQLite record store initialized: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total rows currently stored
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM scored_events", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let latitude: Option<f64> = row.get(2)?;
    let longitude: Option<f64> = row.get(3)?;
    let region: Option<String> = row.get(4)?;
    let observed_at: i64 = row.get(5)?;
    let expires_at: i64 = row.get(6)?;

    Ok(StoredRecord {
        event_id: row.get(0)?,
        text: row.get(1)?,
        location: match (latitude, longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        },
        region: region.as_deref().and_then(Region::parse),
        observed_at: DateTime::from_timestamp_millis(observed_at).unwrap_or_default(),
        expires_at: DateTime::from_timestamp_millis(expires_at).unwrap_or_default(),
        sentiment_score: row.get(7)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_batch(&self, records: &[StoredRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO scored_events
                 (event_id, text, latitude, longitude, region, observed_at, expires_at, sentiment_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.event_id,
                    record.text,
                    record.location.map(|p| p.lat),
                    record.location.map(|p| p.lon),
                    record.region.map(|r| r.as_str()),
                    record.observed_at.timestamp_millis(),
                    record.expires_at.timestamp_millis(),
                    record.sentiment_score,
                ])?;
            }
        }
        // Dropping an uncommitted transaction rolls it back
        tx.commit()?;

        Ok(records.len())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM scored_events WHERE expires_at < ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(deleted)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, text, latitude, longitude, region, observed_at, expires_at, sentiment_score
             FROM scored_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], record_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
