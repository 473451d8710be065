//! Sync engine: one bidirectional pass between the local store and the remote.
//!
//! A pass pulls everything the remote changed since the user's watermark,
//! pushes everything the device changed since the same watermark (minus rows
//! the pull is about to overwrite), applies the pulled rows with
//! last-write-wins and finally advances the watermark to the pass start.
//! Any failure aborts the pass and leaves the watermark where it was, so the
//! next pass retries the same window.

use crate::blocking::with_store;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::state::{KindCounts, SyncOutcome, SyncReport, SyncStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tyl_storage::LocalStore;
use tyl_types::{ChangeSet, SyncWatermark, Timestamp, UserId};

/// Drives sync passes and publishes [`SyncStatus`].
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            remote,
            clock,
            config,
            status,
        }
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status transition.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Enables sync for `user_id`, creating its watermark on first use.
    ///
    /// `None` (nobody signed in) leaves the engine disabled.
    pub async fn enable(&self, user_id: Option<UserId>) -> SyncResult<()> {
        let Some(user_id) = user_id else {
            self.disable();
            return Ok(());
        };

        let watermark = with_store(&self.store, move |s| match s.load_watermark(&user_id)? {
            Some(watermark) => Ok(watermark),
            None => {
                let watermark = SyncWatermark::new(user_id);
                s.save_watermark(&watermark)?;
                Ok(watermark)
            }
        })
        .await?;

        self.status.send_modify(|status| {
            status.user_id = Some(user_id);
            status.is_sync_enabled = true;
            status.last_sync = watermark.last_sync;
            status.error = None;
        });
        info!("Sync enabled for user {}", user_id);
        Ok(())
    }

    /// Disables sync and forgets the active user.
    ///
    /// A pass already in flight runs to completion, but its result is not
    /// published.
    pub fn disable(&self) {
        self.status.send_if_modified(|status| {
            if !status.is_sync_enabled && status.user_id.is_none() {
                return false;
            }
            status.user_id = None;
            status.is_sync_enabled = false;
            status.last_sync = None;
            status.error = None;
            true
        });
        debug!("Sync disabled");
    }

    /// Runs one pass unless sync is disabled or a pass is already in flight.
    ///
    /// `clear` ignores the watermark: everything is pulled and nothing is
    /// pushed.
    pub async fn trigger_sync(&self, clear: bool) -> SyncOutcome {
        let mut claimed = None;
        self.status.send_if_modified(|status| {
            if !status.is_sync_enabled || status.is_syncing {
                return false;
            }
            let Some(user_id) = status.user_id else {
                return false;
            };
            claimed = Some(user_id);
            status.is_syncing = true;
            status.error = None;
            true
        });
        let Some(user_id) = claimed else {
            debug!("Sync trigger skipped");
            return SyncOutcome::Skipped;
        };

        let guard = SyncingGuard {
            status: &self.status,
        };
        let pass_started = self.clock.now();
        info!("Sync pass started for user {} (full resync: {})", user_id, clear);

        let result = self.run_pass(user_id, clear, pass_started).await;
        guard.finish(user_id, &result);

        match result {
            Ok(report) => {
                info!(
                    "Sync pass completed: pulled {} (metrics {}, records {}), pushed {} (metrics {}, records {}), applied {}",
                    report.pulled.total(),
                    report.pulled.metrics,
                    report.pulled.records,
                    report.pushed.total(),
                    report.pushed.metrics,
                    report.pushed.records,
                    report.applied
                );
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                warn!("Sync pass failed for user {}: {}", user_id, e);
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run_pass(
        &self,
        user_id: UserId,
        clear: bool,
        pass_started: Timestamp,
    ) -> SyncResult<SyncReport> {
        let previous = with_store(&self.store, move |s| s.load_watermark(&user_id))
            .await?
            .unwrap_or_else(|| SyncWatermark::new(user_id));
        let since = if clear {
            Timestamp::EPOCH
        } else {
            previous.since()
        };
        debug!("Pulling changes since {}", since);

        let (records, metrics, profile) = tokio::try_join!(
            self.remote_call("pull records", self.remote.pull_records(&user_id, since)),
            self.remote_call("pull metrics", self.remote.pull_metrics(&user_id, since)),
            self.remote_call("pull profile", self.remote.pull_profile(&user_id, since)),
        )?;
        let pulled = ChangeSet {
            metrics,
            records,
            profile,
        };
        validate_pulled(&pulled, &user_id)?;
        let pulled_counts = counts(&pulled);

        let mut pushed = KindCounts::default();
        if !clear {
            let mut outgoing =
                with_store(&self.store, move |s| s.changes_since(&user_id, since)).await?;
            outgoing.remove_superseded_by(&pulled);

            if !outgoing.metrics.is_empty() {
                self.remote_call("push metrics", self.remote.push_metrics(&outgoing.metrics))
                    .await?;
            }
            if !outgoing.records.is_empty() {
                self.remote_call("push records", self.remote.push_records(&outgoing.records))
                    .await?;
            }
            if let Some(profile) = &outgoing.profile {
                self.remote_call("push profile", self.remote.push_profile(profile))
                    .await?;
            }
            pushed = counts(&outgoing);
        }

        let applied = if pulled.is_empty() {
            0
        } else {
            with_store(&self.store, move |s| s.apply_remote(&pulled)).await?
        };

        // Never move the watermark backwards, even if the wall clock did.
        let watermark = previous
            .last_sync
            .map_or(pass_started, |last| last.max(pass_started));
        with_store(&self.store, move |s| {
            s.save_watermark(&SyncWatermark {
                user_id,
                last_sync: Some(watermark),
            })
        })
        .await?;

        Ok(SyncReport {
            pulled: pulled_counts,
            pushed,
            applied,
            full_resync: clear,
            watermark,
        })
    }

    async fn remote_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        tokio::time::timeout(self.config.request_timeout(), call)
            .await
            .map_err(|_| SyncError::Timeout { operation })?
    }
}

/// Clears `is_syncing` if a pass is dropped before it finishes.
struct SyncingGuard<'a> {
    status: &'a watch::Sender<SyncStatus>,
}

impl SyncingGuard<'_> {
    /// Publishes the pass result, unless the user changed underneath it.
    fn finish(self, user_id: UserId, result: &SyncResult<SyncReport>) {
        self.status.send_modify(|status| {
            status.is_syncing = false;
            if !status.is_sync_enabled || status.user_id != Some(user_id) {
                return;
            }
            match result {
                Ok(report) => {
                    status.last_sync = Some(report.watermark);
                    status.error = None;
                }
                Err(e) => status.error = Some(e.to_string()),
            }
        });
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.status.send_if_modified(|status| {
            let was_syncing = status.is_syncing;
            status.is_syncing = false;
            was_syncing
        });
    }
}

fn counts(changes: &ChangeSet) -> KindCounts {
    KindCounts {
        metrics: changes.metrics.len(),
        records: changes.records.len(),
        profiles: usize::from(changes.profile.is_some()),
    }
}

/// Rejects a pull that contains rows the active user does not own.
fn validate_pulled(pulled: &ChangeSet, user_id: &UserId) -> SyncResult<()> {
    for metric in &pulled.metrics {
        if metric.id.as_uuid().is_nil() {
            return Err(SyncError::MalformedPayload("metric with nil id".into()));
        }
        if metric.user_id != *user_id {
            return Err(SyncError::MalformedPayload(format!(
                "metric {} belongs to user {}",
                metric.id, metric.user_id
            )));
        }
    }
    for record in &pulled.records {
        if record.metric_id.as_uuid().is_nil() {
            return Err(SyncError::MalformedPayload("record with nil metric id".into()));
        }
        if record.user_id != *user_id {
            return Err(SyncError::MalformedPayload(format!(
                "record {}@{} belongs to user {}",
                record.metric_id, record.date, record.user_id
            )));
        }
    }
    if let Some(profile) = &pulled.profile {
        if profile.id != *user_id {
            return Err(SyncError::MalformedPayload(format!(
                "profile {} does not match user {}",
                profile.id, user_id
            )));
        }
    }
    Ok(())
}
