#![allow(dead_code)]

use chrono::NaiveDate;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tyl_storage::SqliteStore;
use tyl_sync::remote::memory::MemoryRemote;
use tyl_sync::{ManualClock, SyncConfig, SyncEngine};
use tyl_types::{Metric, MetricId, MetricRecord, MetricType, Timestamp, UserId};

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn at(offset_ms: i64) -> Timestamp {
    Timestamp::from_millis(T0 + offset_ms)
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

pub fn make_record(
    metric_id: MetricId,
    user_id: UserId,
    d: u32,
    value: &str,
    updated: Timestamp,
) -> MetricRecord {
    MetricRecord {
        metric_id,
        date: day(d),
        value: value.to_string(),
        user_id,
        updated,
    }
}

pub fn make_metric(user_id: UserId, name: &str, updated: Timestamp) -> Metric {
    let mut metric = Metric::new(user_id, name, MetricType::Number);
    metric.updated = updated;
    metric
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub remote: Arc<MemoryRemote>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<SyncEngine>,
    pub user_id: UserId,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    init_tracing();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let remote = Arc::new(MemoryRemote::new());
    let clock = Arc::new(ManualClock::new(at(0)));
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        clock.clone(),
        config,
    ));
    Harness {
        store,
        remote,
        clock,
        engine,
        user_id: UserId::new(),
    }
}

impl Harness {
    pub async fn enable(&self) {
        self.engine.enable(Some(self.user_id)).await.unwrap();
    }
}
