//! The synchronizable rows.
//!
//! Each kind carries an `updated` stamp written by whichever side performed
//! the last write. That stamp is the only signal used to resolve conflicts.

use crate::{MetricId, Timestamp, UserId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of value a metric tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Boolean,
    Number,
    Range,
    Text,
    Tags,
    Logs,
}

impl MetricType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Range => "range",
            Self::Text => "text",
            Self::Tags => "tags",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(Self::Boolean),
            "number" => Ok(Self::Number),
            "range" => Ok(Self::Range),
            "text" => Ok(Self::Text),
            "tags" => Ok(Self::Tags),
            "logs" => Ok(Self::Logs),
            other => Err(crate::Error::UnknownMetricType(other.to_string())),
        }
    }
}

/// A trackable definition.
///
/// Deletion is soft: `is_deleted` flips and `updated` is refreshed, so a
/// delete travels through sync like any other edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: MetricId,
    pub user_id: UserId,
    pub name: String,
    pub metric_type: MetricType,
    /// Opaque settings blob, owned by the UI layer.
    pub settings: serde_json::Value,
    pub is_deleted: bool,
    pub updated: Timestamp,
}

impl Metric {
    /// Creates a live metric with empty settings.
    pub fn new(user_id: UserId, name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            id: MetricId::new(),
            user_id,
            name: name.into(),
            metric_type,
            settings: serde_json::Value::Object(serde_json::Map::new()),
            is_deleted: false,
            updated: Timestamp::EPOCH,
        }
    }
}

/// One value of one metric on one calendar day.
///
/// Uniquely identified by `(metric_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub metric_id: MetricId,
    /// Day granularity, UTC.
    pub date: NaiveDate,
    /// String-encoded value; interpretation depends on the metric type.
    pub value: String,
    pub user_id: UserId,
    pub updated: Timestamp,
}

impl MetricRecord {
    /// The natural key this record is upserted by.
    #[must_use]
    pub fn natural_key(&self) -> (MetricId, NaiveDate) {
        (self.metric_id, self.date)
    }
}

/// Per-user profile: settings plus display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub settings: serde_json::Value,
    pub updated: Timestamp,
}

impl UserProfile {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            name: None,
            email: None,
            image: None,
            settings: serde_json::Value::Object(serde_json::Map::new()),
            updated: Timestamp::EPOCH,
        }
    }
}

/// "Everything before `last_sync` is reconciled" for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWatermark {
    pub user_id: UserId,
    pub last_sync: Option<Timestamp>,
}

impl SyncWatermark {
    /// A watermark for a user that has never completed a pass.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            last_sync: None,
        }
    }

    /// Lower bound for "changed since" queries.
    #[must_use]
    pub fn since(&self) -> Timestamp {
        self.last_sync.unwrap_or(Timestamp::EPOCH)
    }
}
