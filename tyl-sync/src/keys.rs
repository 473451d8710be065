//! Subscription keys.
//!
//! A key names "the thing a UI component cares about". Keys are derived
//! purely from a row's natural identity, so the same logical row always maps
//! to the same key no matter which write path produced it.

use chrono::NaiveDate;
use std::fmt;
use tyl_storage::Row;
use tyl_types::{Metric, MetricId, MetricRecord, Timestamp, UserId, UserProfile};

/// Identity of an observable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// One metric's value on one day.
    Record { metric_id: MetricId, date: NaiveDate },
    /// A metric definition.
    Metric(MetricId),
    /// A user's profile.
    User(UserId),
}

impl SubscriptionKey {
    pub const fn record(metric_id: MetricId, date: NaiveDate) -> Self {
        Self::Record { metric_id, date }
    }

    pub const fn metric(id: MetricId) -> Self {
        Self::Metric(id)
    }

    pub const fn user(id: UserId) -> Self {
        Self::User(id)
    }
}

/// Renders the stable string form: `{metricId}_{dateEpochMillis}` for
/// records, the bare id otherwise.
impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record { metric_id, date } => {
                write!(f, "{}_{}", metric_id, Timestamp::start_of_day(*date).as_millis())
            }
            Self::Metric(id) => write!(f, "{id}"),
            Self::User(id) => write!(f, "{id}"),
        }
    }
}

pub fn record_key(record: &MetricRecord) -> SubscriptionKey {
    SubscriptionKey::record(record.metric_id, record.date)
}

pub fn metric_key(metric: &Metric) -> SubscriptionKey {
    SubscriptionKey::metric(metric.id)
}

pub fn user_key(profile: &UserProfile) -> SubscriptionKey {
    SubscriptionKey::user(profile.id)
}

/// Key for any changed row.
pub fn key_for(row: &Row) -> SubscriptionKey {
    match row {
        Row::Metric(metric) => metric_key(metric),
        Row::Record(record) => record_key(record),
        Row::Profile(profile) => user_key(profile),
    }
}
