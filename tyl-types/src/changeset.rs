//! Batches of rows exchanged during a sync pass.

use crate::{Metric, MetricId, MetricRecord, Timestamp, UserProfile};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rows of every kind changed since some watermark.
///
/// Used for both directions: what the remote returned from a pull, and what
/// the local store has to push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub metrics: Vec<Metric>,
    pub records: Vec<MetricRecord>,
    pub profile: Option<UserProfile>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.records.is_empty() && self.profile.is_none()
    }

    /// Total number of rows across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len() + self.records.len() + usize::from(self.profile.is_some())
    }

    /// Drops every row that `incoming` is about to overwrite.
    ///
    /// A row is superseded when `incoming` holds the same natural key with an
    /// `updated` stamp at least as new. Rows the local side wrote later survive.
    pub fn remove_superseded_by(&mut self, incoming: &ChangeSet) {
        let metrics: HashMap<MetricId, Timestamp> =
            incoming.metrics.iter().map(|m| (m.id, m.updated)).collect();
        self.metrics
            .retain(|m| metrics.get(&m.id).is_none_or(|theirs| m.updated > *theirs));

        let records: HashMap<(MetricId, NaiveDate), Timestamp> = incoming
            .records
            .iter()
            .map(|r| (r.natural_key(), r.updated))
            .collect();
        self.records.retain(|r| {
            records
                .get(&r.natural_key())
                .is_none_or(|theirs| r.updated > *theirs)
        });

        if let (Some(ours), Some(theirs)) = (&self.profile, &incoming.profile) {
            if ours.id == theirs.id && ours.updated <= theirs.updated {
                self.profile = None;
            }
        }
    }
}
