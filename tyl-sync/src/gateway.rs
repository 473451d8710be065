//! Local mutation gateway.
//!
//! The one entry point for UI writes. Each write stamps `updated` with the
//! current time, upserts by natural key and, only once the store accepted it,
//! asks the scheduler for a debounced sync. Observers are notified by the
//! store's change stream, not by the gateway.

use crate::blocking::with_store;
use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::scheduler::SyncScheduler;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;
use tyl_storage::LocalStore;
use tyl_types::{Metric, MetricId, MetricRecord, UserId, UserProfile};

/// A value the user entered for one metric on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub metric_id: MetricId,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub value: String,
}

#[derive(Clone)]
pub struct MutationGateway {
    store: Arc<dyn LocalStore>,
    scheduler: Arc<SyncScheduler>,
    clock: Arc<dyn Clock>,
}

impl MutationGateway {
    pub fn new(
        store: Arc<dyn LocalStore>,
        scheduler: Arc<SyncScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
        }
    }

    /// Upserts the record at `(metric_id, date)`.
    ///
    /// Store failures are returned as is; no sync is scheduled for them.
    pub async fn write_record(&self, entry: RecordEntry) -> SyncResult<MetricRecord> {
        let record = MetricRecord {
            metric_id: entry.metric_id,
            date: entry.date,
            value: entry.value,
            user_id: entry.user_id,
            updated: self.clock.now(),
        };
        let row = record.clone();
        with_store(&self.store, move |s| s.upsert_record(&row)).await?;
        debug!("Wrote record {}@{}", record.metric_id, record.date);

        self.scheduler.schedule();
        Ok(record)
    }

    /// Creates or replaces a metric definition.
    pub async fn write_metric(&self, mut metric: Metric) -> SyncResult<Metric> {
        metric.updated = self.clock.now();
        let row = metric.clone();
        with_store(&self.store, move |s| s.upsert_metric(&row)).await?;
        debug!("Wrote metric {}", metric.id);

        self.scheduler.schedule();
        Ok(metric)
    }

    /// Soft-deletes a metric so the deletion syncs like an edit.
    pub async fn delete_metric(&self, id: MetricId) -> SyncResult<Metric> {
        let now = self.clock.now();
        let deleted = with_store(&self.store, move |s| {
            let Some(mut metric) = s.get_metric(&id)? else {
                return Ok(None);
            };
            metric.is_deleted = true;
            metric.updated = now;
            s.upsert_metric(&metric)?;
            Ok(Some(metric))
        })
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("metric {id}")))?;
        debug!("Deleted metric {}", id);

        self.scheduler.schedule();
        Ok(deleted)
    }

    /// Creates or replaces the user's profile.
    pub async fn write_profile(&self, mut profile: UserProfile) -> SyncResult<UserProfile> {
        profile.updated = self.clock.now();
        let row = profile.clone();
        with_store(&self.store, move |s| s.upsert_profile(&row)).await?;
        debug!("Wrote profile {}", profile.id);

        self.scheduler.schedule();
        Ok(profile)
    }
}
