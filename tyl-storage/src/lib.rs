//! Local store for the Track Your Life sync engine.
//!
//! The sync engine treats the on-device store as a collaborator with a small
//! contract, captured by [`LocalStore`]:
//!
//! - point upsert by natural key for each entity kind
//! - "all rows of kind K for user U with `updated >= t`"
//! - a low-level change stream carrying `{table, rowid}` on every
//!   insert/update, consumed by the change notifier
//! - per-user sync watermark persistence
//!
//! [`SqliteStore`] implements it on top of SQLite. Change events come from
//! SQLite's update hook, so writes made by the sync engine and writes made by
//! the UI surface identically.

mod change;
mod error;
mod sqlite_store;

pub use change::{ChangeEvent, Row, Table};
pub use error::{StorageError, StorageResult};
pub use sqlite_store::{SqliteStore, CHANGE_CHANNEL_CAPACITY};

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tyl_types::{
    ChangeSet, Metric, MetricId, MetricRecord, SyncWatermark, Timestamp, UserId, UserProfile,
};

/// The on-device store as seen by the sync engine and the mutation gateway.
///
/// Methods are blocking; async callers run them on `spawn_blocking`.
/// Implementations must serialize their own mutations.
pub trait LocalStore: Send + Sync {
    /// Inserts or replaces the record at `(metric_id, date)`.
    fn upsert_record(&self, record: &MetricRecord) -> StorageResult<()>;

    /// Inserts or replaces the metric with this id.
    fn upsert_metric(&self, metric: &Metric) -> StorageResult<()>;

    /// Inserts or replaces the profile with this id.
    fn upsert_profile(&self, profile: &UserProfile) -> StorageResult<()>;

    fn get_record(&self, metric_id: &MetricId, date: NaiveDate)
        -> StorageResult<Option<MetricRecord>>;

    fn get_metric(&self, id: &MetricId) -> StorageResult<Option<Metric>>;

    fn get_profile(&self, id: &UserId) -> StorageResult<Option<UserProfile>>;

    /// Every row owned by `user_id` with `updated >= since`.
    fn changes_since(&self, user_id: &UserId, since: Timestamp) -> StorageResult<ChangeSet>;

    /// Applies rows pulled from the remote with last-write-wins.
    ///
    /// An incoming row replaces the local one unless the local row carries a
    /// strictly newer `updated`. Returns the number of rows written.
    fn apply_remote(&self, changes: &ChangeSet) -> StorageResult<usize>;

    /// Fetches the current contents of the row a change event points at.
    fn row_by_id(&self, table: Table, rowid: i64) -> StorageResult<Option<Row>>;

    fn load_watermark(&self, user_id: &UserId) -> StorageResult<Option<SyncWatermark>>;

    fn save_watermark(&self, watermark: &SyncWatermark) -> StorageResult<()>;

    /// Subscribes to row change events.
    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent>;
}
