//! Core type definitions for the Track Your Life sync engine.
//!
//! This crate defines the plain data shared by the store, the remote
//! contract and the engine:
//! - Metric and user identifiers (UUID v7)
//! - Millisecond timestamps used for last-write-wins ordering
//! - The three synchronizable entity kinds and the per-user sync watermark
//! - `ChangeSet`, a batch of rows moving in one direction during a pass

mod changeset;
mod entity;
mod ids;
mod timestamp;

pub use changeset::ChangeSet;
pub use entity::{Metric, MetricRecord, MetricType, SyncWatermark, UserProfile};
pub use ids::{MetricId, UserId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown metric type: {0}")]
    UnknownMetricType(String),
}
