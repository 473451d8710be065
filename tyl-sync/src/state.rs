//! Observable sync status and per-pass results.

use tyl_types::{Timestamp, UserId};

/// What the UI sees of the sync engine.
///
/// Published through a `watch` channel; every transition replaces the whole
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// The signed-in user, if any.
    pub user_id: Option<UserId>,
    /// A pass is in flight.
    pub is_syncing: bool,
    /// A user is signed in and sync may run.
    pub is_sync_enabled: bool,
    /// Start time of the last successful pass.
    pub last_sync: Option<Timestamp>,
    /// Message of the last failed pass; cleared when the next pass starts.
    pub error: Option<String>,
}

impl SyncStatus {
    pub fn phase(&self) -> SyncPhase {
        if !self.is_sync_enabled {
            SyncPhase::Disabled
        } else if self.is_syncing {
            SyncPhase::Syncing
        } else {
            SyncPhase::Idle
        }
    }
}

/// Coarse engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Disabled,
    Idle,
    Syncing,
}

/// Row counts per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub metrics: usize,
    pub records: usize,
    pub profiles: usize,
}

impl KindCounts {
    pub fn total(&self) -> usize {
        self.metrics + self.records + self.profiles
    }
}

/// Summary of one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: KindCounts,
    pub pushed: KindCounts,
    /// Pulled rows that actually overwrote (or created) a local row.
    pub applied: usize,
    /// The pass ignored the watermark and skipped the push.
    pub full_resync: bool,
    /// Watermark persisted at the end of the pass.
    pub watermark: Timestamp,
}

/// What a call to `trigger_sync` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Sync is disabled or a pass was already in flight.
    Skipped,
    Completed(SyncReport),
    /// The pass aborted; the message is also published in [`SyncStatus::error`].
    Failed(String),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}
