//! Low-level change events.

use std::fmt;
use tyl_types::{Metric, MetricRecord, UserProfile};

/// Tables that hold synchronizable rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Metrics,
    Records,
    Profiles,
}

impl Table {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Records => "records",
            Self::Profiles => "profiles",
        }
    }

    /// Maps a SQLite table name back to a table; `None` for bookkeeping tables.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "metrics" => Some(Self::Metrics),
            "records" => Some(Self::Records),
            "profiles" => Some(Self::Profiles),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// "Row `rowid` of `table` was inserted or updated."
///
/// Carries a row pointer only; listeners re-fetch the row to see its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub rowid: i64,
}

/// The current value of a changed row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Metric(Metric),
    Record(MetricRecord),
    Profile(UserProfile),
}

