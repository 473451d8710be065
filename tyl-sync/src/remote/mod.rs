//! Remote service abstraction.
//!
//! The engine talks to the hosted backend only through [`RemoteStore`], so
//! any transport (HTTP API, hosted database client, a test double) can sit
//! behind it. [`memory::MemoryRemote`] is the in-process implementation.

pub mod memory;

use crate::error::SyncResult;
use async_trait::async_trait;
use tyl_types::{Metric, MetricRecord, Timestamp, UserId, UserProfile};

/// The hosted copy of a user's data.
///
/// Pushes are upserts by natural key. The service resolves conflicting
/// writes with the same last-write-wins rule the local store uses.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Records owned by `user_id` with `updated >= since`.
    async fn pull_records(&self, user_id: &UserId, since: Timestamp)
        -> SyncResult<Vec<MetricRecord>>;

    /// Metrics owned by `user_id` with `updated >= since`.
    async fn pull_metrics(&self, user_id: &UserId, since: Timestamp) -> SyncResult<Vec<Metric>>;

    /// The user's profile, if it changed at or after `since`.
    async fn pull_profile(&self, user_id: &UserId, since: Timestamp)
        -> SyncResult<Option<UserProfile>>;

    async fn push_records(&self, records: &[MetricRecord]) -> SyncResult<()>;

    async fn push_metrics(&self, metrics: &[Metric]) -> SyncResult<()>;

    async fn push_profile(&self, profile: &UserProfile) -> SyncResult<()>;
}
