//! Offline-first sync engine for Track Your Life.
//!
//! Every read and write the UI performs goes to the on-device store. This
//! crate keeps that store converged with the hosted copy of the user's data,
//! and tells UI observers when rows they display change.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Keys**: derive a [`SubscriptionKey`] from a row's natural identity
//! - **Notifier**: maps store change events to per-key callbacks
//! - **Gateway**: the UI's write path; stamps, upserts, schedules a sync
//! - **Engine**: runs one pull/push/apply pass and publishes [`SyncStatus`]
//! - **Scheduler**: debounced, interval and manual triggers
//! - **Remote**: the [`RemoteStore`] seam to the hosted service
//!
//! ## Sync Pass
//!
//! 1. **Pull**: rows the remote changed since the watermark
//! 2. **Push**: rows the device changed since the watermark, minus rows the
//!    pull is about to overwrite
//! 3. **Apply**: pulled rows, last-write-wins on `updated`
//! 4. **Advance**: watermark moves to the pass start time
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tyl_storage::SqliteStore;
//! use tyl_sync::{remote::memory::MemoryRemote, SyncConfig, SyncService};
//! use tyl_types::UserId;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! let remote = Arc::new(MemoryRemote::new());
//! let service = SyncService::new(store, remote, SyncConfig::default());
//!
//! service.login(Some(UserId::new())).await?;
//! let outcome = service.scheduler().sync_now().await;
//! # Ok(())
//! # }
//! ```

mod blocking;
pub mod clock;
mod config;
mod engine;
mod error;
mod gateway;
pub mod keys;
pub mod notifier;
pub mod remote;
mod scheduler;
mod service;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use gateway::{MutationGateway, RecordEntry};
pub use keys::{key_for, metric_key, record_key, user_key, SubscriptionKey};
pub use notifier::{ChangeNotifier, SubscriptionId, Unsubscribe};
pub use remote::RemoteStore;
pub use scheduler::SyncScheduler;
pub use service::SyncService;
pub use state::{KindCounts, SyncOutcome, SyncPhase, SyncReport, SyncStatus};
