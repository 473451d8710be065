//! Millisecond wall-clock timestamps.
//!
//! `updated` stamps and sync watermarks are both expressed in this type. The
//! ordering is plain numeric ordering of milliseconds since the Unix epoch;
//! there is no logical component because conflicts are resolved at row
//! granularity by "later write wins".

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch. Used as the "distant past" when no watermark exists and
    /// as the pull bound of a full resync.
    pub const EPOCH: Self = Self(0);

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// UTC midnight of `date`. This is the value record keys are built from.
    #[must_use]
    pub fn start_of_day(date: NaiveDate) -> Self {
        Self(date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis())
    }

    /// Calendar day (UTC) this instant falls on.
    pub fn date(&self) -> crate::Result<NaiveDate> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| crate::Error::InvalidTimestamp(self.0.to_string()))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is in the future.
    #[must_use]
    pub fn duration_since(&self, earlier: Self) -> Duration {
        u64::try_from(self.0.saturating_sub(earlier.0))
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ms", self.0),
        }
    }
}
