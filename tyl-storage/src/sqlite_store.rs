//! SQLite-backed local store.
//!
//! All writes that touch an existing row use `ON CONFLICT ... DO UPDATE`
//! rather than `INSERT OR REPLACE`, so a row keeps its rowid for its whole
//! life and the update hook reports an update instead of a delete+insert.

use crate::change::{ChangeEvent, Row, Table};
use crate::error::{StorageError, StorageResult};
use crate::LocalStore;
use chrono::NaiveDate;
use rusqlite::hooks::Action;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row as SqlRow};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tyl_types::{
    ChangeSet, Metric, MetricId, MetricRecord, SyncWatermark, Timestamp, UserId, UserProfile,
};

/// Capacity of the change event channel. Slow listeners past this many
/// pending events observe a lag instead of blocking writers.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

const METRIC_COLUMNS: &str = "id, user_id, name, metric_type, settings, is_deleted, updated";
const RECORD_COLUMNS: &str = "metric_id, date, value, user_id, updated";
const PROFILE_COLUMNS: &str = "id, name, email, image, settings, updated";

const UPSERT_METRIC: &str = "
    INSERT INTO metrics (id, user_id, name, metric_type, settings, is_deleted, updated)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(id) DO UPDATE SET
        user_id = excluded.user_id, name = excluded.name,
        metric_type = excluded.metric_type, settings = excluded.settings,
        is_deleted = excluded.is_deleted, updated = excluded.updated";

const UPSERT_RECORD: &str = "
    INSERT INTO records (metric_id, date, value, user_id, updated)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(metric_id, date) DO UPDATE SET
        value = excluded.value, user_id = excluded.user_id, updated = excluded.updated";

const UPSERT_PROFILE: &str = "
    INSERT INTO profiles (id, name, email, image, settings, updated)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name, email = excluded.email, image = excluded.image,
        settings = excluded.settings, updated = excluded.updated";

/// Last-write-wins variant of an upsert: the conflicting row is only
/// replaced when the incoming stamp is at least as new.
fn merge_sql(upsert: &str, table: Table) -> String {
    format!("{upsert} WHERE excluded.updated >= {table}.updated")
}

/// Local store backed by a single SQLite connection.
///
/// The connection sits behind a mutex; every method takes it for the
/// duration of one statement or transaction.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened local store at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        init_schema(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let hook_tx = changes.clone();
        conn.update_hook(Some(
            move |action: Action, _db: &str, table: &str, rowid: i64| {
                if matches!(action, Action::SQLITE_DELETE) {
                    return;
                }
                if let Some(table) = Table::from_name(table) {
                    // No receivers is fine: nobody is listening yet.
                    let _ = hook_tx.send(ChangeEvent { table, rowid });
                }
            },
        ));

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // ── Per-kind range queries ───────────────────────────────────

    pub fn metrics_since(&self, user_id: &UserId, since: Timestamp) -> StorageResult<Vec<Metric>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {METRIC_COLUMNS} FROM metrics WHERE user_id = ?1 AND updated >= ?2 ORDER BY updated, id"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string(), since.as_millis()], read_metric)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn records_since(
        &self,
        user_id: &UserId,
        since: Timestamp,
    ) -> StorageResult<Vec<MetricRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE user_id = ?1 AND updated >= ?2 ORDER BY updated, metric_id, date"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string(), since.as_millis()], read_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn profile_since(
        &self,
        user_id: &UserId,
        since: Timestamp,
    ) -> StorageResult<Option<UserProfile>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1 AND updated >= ?2"),
                params![user_id.to_string(), since.as_millis()],
                read_profile,
            )
            .optional()?)
    }

    /// Number of records stored for a metric, across all days.
    pub fn record_count(&self, metric_id: &MetricId) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE metric_id = ?1",
            params![metric_id.to_string()],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|e| StorageError::InvalidData(e.to_string()))
    }
}

impl LocalStore for SqliteStore {
    fn upsert_record(&self, record: &MetricRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        write_record(&conn, UPSERT_RECORD, record)?;
        debug!("Upserted record {}@{}", record.metric_id, record.date);
        Ok(())
    }

    fn upsert_metric(&self, metric: &Metric) -> StorageResult<()> {
        let conn = self.conn()?;
        write_metric(&conn, UPSERT_METRIC, metric)?;
        debug!("Upserted metric {}", metric.id);
        Ok(())
    }

    fn upsert_profile(&self, profile: &UserProfile) -> StorageResult<()> {
        let conn = self.conn()?;
        write_profile(&conn, UPSERT_PROFILE, profile)?;
        debug!("Upserted profile {}", profile.id);
        Ok(())
    }

    fn get_record(
        &self,
        metric_id: &MetricId,
        date: NaiveDate,
    ) -> StorageResult<Option<MetricRecord>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE metric_id = ?1 AND date = ?2"),
                params![metric_id.to_string(), date.to_string()],
                read_record,
            )
            .optional()?)
    }

    fn get_metric(&self, id: &MetricId) -> StorageResult<Option<Metric>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE id = ?1"),
                params![id.to_string()],
                read_metric,
            )
            .optional()?)
    }

    fn get_profile(&self, id: &UserId) -> StorageResult<Option<UserProfile>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
                read_profile,
            )
            .optional()?)
    }

    fn changes_since(&self, user_id: &UserId, since: Timestamp) -> StorageResult<ChangeSet> {
        Ok(ChangeSet {
            metrics: self.metrics_since(user_id, since)?,
            records: self.records_since(user_id, since)?,
            profile: self.profile_since(user_id, since)?,
        })
    }

    fn apply_remote(&self, changes: &ChangeSet) -> StorageResult<usize> {
        let merge_metric = merge_sql(UPSERT_METRIC, Table::Metrics);
        let merge_record = merge_sql(UPSERT_RECORD, Table::Records);
        let merge_profile = merge_sql(UPSERT_PROFILE, Table::Profiles);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        for metric in &changes.metrics {
            written += write_metric(&tx, &merge_metric, metric)?;
        }
        for record in &changes.records {
            written += write_record(&tx, &merge_record, record)?;
        }
        if let Some(profile) = &changes.profile {
            written += write_profile(&tx, &merge_profile, profile)?;
        }
        tx.commit()?;

        debug!("Applied {}/{} remote rows", written, changes.len());
        Ok(written)
    }

    fn row_by_id(&self, table: Table, rowid: i64) -> StorageResult<Option<Row>> {
        let conn = self.conn()?;
        let row = match table {
            Table::Metrics => conn
                .query_row(
                    &format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE rowid = ?1"),
                    params![rowid],
                    read_metric,
                )
                .optional()?
                .map(Row::Metric),
            Table::Records => conn
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM records WHERE rowid = ?1"),
                    params![rowid],
                    read_record,
                )
                .optional()?
                .map(Row::Record),
            Table::Profiles => conn
                .query_row(
                    &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE rowid = ?1"),
                    params![rowid],
                    read_profile,
                )
                .optional()?
                .map(Row::Profile),
        };
        Ok(row)
    }

    fn load_watermark(&self, user_id: &UserId) -> StorageResult<Option<SyncWatermark>> {
        let conn = self.conn()?;
        let last_sync: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_sync FROM sync_watermarks WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last_sync.map(|last_sync| SyncWatermark {
            user_id: *user_id,
            last_sync: last_sync.map(Timestamp::from_millis),
        }))
    }

    fn save_watermark(&self, watermark: &SyncWatermark) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_watermarks (user_id, last_sync) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_sync = excluded.last_sync",
            params![
                watermark.user_id.to_string(),
                watermark.last_sync.map(|ts| ts.as_millis()),
            ],
        )?;
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn init_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metrics (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            settings TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_metrics_user_updated ON metrics(user_id, updated);

        CREATE TABLE IF NOT EXISTS records (
            metric_id TEXT NOT NULL,
            date TEXT NOT NULL,
            value TEXT NOT NULL,
            user_id TEXT NOT NULL,
            updated INTEGER NOT NULL,
            UNIQUE(metric_id, date)
        );
        CREATE INDEX IF NOT EXISTS idx_records_user_updated ON records(user_id, updated);

        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            name TEXT,
            email TEXT,
            image TEXT,
            settings TEXT NOT NULL,
            updated INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_watermarks (
            user_id TEXT PRIMARY KEY,
            last_sync INTEGER
        );
        ",
    )?;
    Ok(())
}

// ── Row writers ──────────────────────────────────────────────────

fn write_metric(conn: &Connection, sql: &str, metric: &Metric) -> StorageResult<usize> {
    Ok(conn.execute(
        sql,
        params![
            metric.id.to_string(),
            metric.user_id.to_string(),
            metric.name,
            metric.metric_type.as_str(),
            serde_json::to_string(&metric.settings)?,
            metric.is_deleted,
            metric.updated.as_millis(),
        ],
    )?)
}

fn write_record(conn: &Connection, sql: &str, record: &MetricRecord) -> StorageResult<usize> {
    Ok(conn.execute(
        sql,
        params![
            record.metric_id.to_string(),
            record.date.to_string(),
            record.value,
            record.user_id.to_string(),
            record.updated.as_millis(),
        ],
    )?)
}

fn write_profile(conn: &Connection, sql: &str, profile: &UserProfile) -> StorageResult<usize> {
    Ok(conn.execute(
        sql,
        params![
            profile.id.to_string(),
            profile.name,
            profile.email,
            profile.image,
            serde_json::to_string(&profile.settings)?,
            profile.updated.as_millis(),
        ],
    )?)
}

// ── Row readers ──────────────────────────────────────────────────

fn read_metric(row: &SqlRow<'_>) -> rusqlite::Result<Metric> {
    Ok(Metric {
        id: parse_col(row, 0)?,
        user_id: parse_col(row, 1)?,
        name: row.get(2)?,
        metric_type: parse_col(row, 3)?,
        settings: json_col(row, 4)?,
        is_deleted: row.get(5)?,
        updated: Timestamp::from_millis(row.get(6)?),
    })
}

fn read_record(row: &SqlRow<'_>) -> rusqlite::Result<MetricRecord> {
    Ok(MetricRecord {
        metric_id: parse_col(row, 0)?,
        date: parse_col(row, 1)?,
        value: row.get(2)?,
        user_id: parse_col(row, 3)?,
        updated: Timestamp::from_millis(row.get(4)?),
    })
}

fn read_profile(row: &SqlRow<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        image: row.get(3)?,
        settings: json_col(row, 4)?,
        updated: Timestamp::from_millis(row.get(5)?),
    })
}

/// Reads a TEXT column and parses it with `FromStr`.
fn parse_col<T>(row: &SqlRow<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_col(row: &SqlRow<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
