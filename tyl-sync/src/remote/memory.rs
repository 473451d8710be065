//! In-memory remote service for tests and offline demos.

use super::RemoteStore;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use tyl_types::{Metric, MetricId, MetricRecord, Timestamp, UserId, UserProfile};

#[derive(Default)]
struct State {
    metrics: HashMap<MetricId, Metric>,
    records: HashMap<(MetricId, NaiveDate), MetricRecord>,
    profiles: HashMap<UserId, UserProfile>,
    failure: Option<String>,
    latency: Duration,
    injected_records: Vec<MetricRecord>,
    pulls: usize,
    pushed_metrics: Vec<Metric>,
    pushed_records: Vec<MetricRecord>,
    pushed_profiles: Vec<UserProfile>,
}

/// A remote backed by hash maps.
///
/// Applies last-write-wins on push (`incoming.updated >= stored.updated`
/// replaces), and can be told to fail or to respond slowly.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent call fail with `message` until [`recover`](Self::recover).
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state().failure = Some(message.into());
    }

    pub fn recover(&self) {
        self.state().failure = None;
    }

    /// Delays every call by `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Appends `records` verbatim to every record pull, bypassing the owner
    /// filter. Simulates a misbehaving server.
    pub fn inject_pull_records(&self, records: Vec<MetricRecord>) {
        self.state().injected_records = records;
    }

    /// Seeds a metric as if another device had pushed it.
    pub fn insert_metric(&self, metric: Metric) {
        self.state().metrics.insert(metric.id, metric);
    }

    /// Seeds a record as if another device had pushed it.
    pub fn insert_record(&self, record: MetricRecord) {
        self.state().records.insert(record.natural_key(), record);
    }

    /// Seeds a profile as if another device had pushed it.
    pub fn insert_profile(&self, profile: UserProfile) {
        self.state().profiles.insert(profile.id, profile);
    }

    pub fn metric(&self, id: &MetricId) -> Option<Metric> {
        self.state().metrics.get(id).cloned()
    }

    pub fn record(&self, metric_id: MetricId, date: NaiveDate) -> Option<MetricRecord> {
        self.state().records.get(&(metric_id, date)).cloned()
    }

    pub fn profile(&self, id: &UserId) -> Option<UserProfile> {
        self.state().profiles.get(id).cloned()
    }

    /// Number of record pulls served, one per sync pass that reached the remote.
    pub fn pull_count(&self) -> usize {
        self.state().pulls
    }

    /// Every metric received through `push_metrics`, in arrival order.
    pub fn pushed_metrics(&self) -> Vec<Metric> {
        self.state().pushed_metrics.clone()
    }

    /// Every record received through `push_records`, in arrival order.
    pub fn pushed_records(&self) -> Vec<MetricRecord> {
        self.state().pushed_records.clone()
    }

    /// Every profile received through `push_profile`, in arrival order.
    pub fn pushed_profiles(&self) -> Vec<UserProfile> {
        self.state().pushed_profiles.clone()
    }

    async fn serve(&self) -> SyncResult<()> {
        let (latency, failure) = {
            let state = self.state();
            (state.latency, state.failure.clone())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(message) => Err(SyncError::Remote(message)),
            None => Ok(()),
        }
    }
}

/// Server-side last-write-wins: ties go to the incoming row.
fn newer_or_equal<T>(
    stored: Option<&T>,
    incoming: Timestamp,
    updated: impl Fn(&T) -> Timestamp,
) -> bool {
    stored.is_none_or(|s| incoming >= updated(s))
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn pull_records(
        &self,
        user_id: &UserId,
        since: Timestamp,
    ) -> SyncResult<Vec<MetricRecord>> {
        self.serve().await?;
        let mut state = self.state();
        state.pulls += 1;
        let mut records: Vec<MetricRecord> = state
            .records
            .values()
            .filter(|r| r.user_id == *user_id && r.updated >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.updated, r.natural_key()));
        records.extend(state.injected_records.iter().cloned());
        Ok(records)
    }

    async fn pull_metrics(&self, user_id: &UserId, since: Timestamp) -> SyncResult<Vec<Metric>> {
        self.serve().await?;
        let state = self.state();
        let mut metrics: Vec<Metric> = state
            .metrics
            .values()
            .filter(|m| m.user_id == *user_id && m.updated >= since)
            .cloned()
            .collect();
        metrics.sort_by_key(|m| (m.updated, m.id));
        Ok(metrics)
    }

    async fn pull_profile(
        &self,
        user_id: &UserId,
        since: Timestamp,
    ) -> SyncResult<Option<UserProfile>> {
        self.serve().await?;
        Ok(self
            .state()
            .profiles
            .get(user_id)
            .filter(|p| p.updated >= since)
            .cloned())
    }

    async fn push_records(&self, records: &[MetricRecord]) -> SyncResult<()> {
        self.serve().await?;
        let mut state = self.state();
        for record in records {
            let key = record.natural_key();
            if newer_or_equal(state.records.get(&key), record.updated, |r| r.updated) {
                state.records.insert(key, record.clone());
            } else {
                debug!("Remote kept newer record {}@{}", record.metric_id, record.date);
            }
            state.pushed_records.push(record.clone());
        }
        Ok(())
    }

    async fn push_metrics(&self, metrics: &[Metric]) -> SyncResult<()> {
        self.serve().await?;
        let mut state = self.state();
        for metric in metrics {
            if newer_or_equal(state.metrics.get(&metric.id), metric.updated, |m| m.updated) {
                state.metrics.insert(metric.id, metric.clone());
            } else {
                debug!("Remote kept newer metric {}", metric.id);
            }
            state.pushed_metrics.push(metric.clone());
        }
        Ok(())
    }

    async fn push_profile(&self, profile: &UserProfile) -> SyncResult<()> {
        self.serve().await?;
        let mut state = self.state();
        if newer_or_equal(state.profiles.get(&profile.id), profile.updated, |p| p.updated) {
            state.profiles.insert(profile.id, profile.clone());
        }
        state.pushed_profiles.push(profile.clone());
        Ok(())
    }
}
