//! Decides when sync passes run.
//!
//! Three triggers feed the engine:
//!
//! - **Debounced**: [`SyncScheduler::schedule`] after each local write. Every
//!   call restarts the quiet-period countdown, so a burst of writes produces a
//!   single pass.
//! - **Interval**: a ticker started by [`SyncScheduler::start`] that schedules
//!   a pass once the last sync is older than the foreground or background
//!   staleness threshold.
//! - **Manual**: [`SyncScheduler::sync_now`] and
//!   [`SyncScheduler::force_full_resync`] run a pass immediately.

use crate::engine::SyncEngine;
use crate::state::SyncOutcome;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::debug;

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    foreground: AtomicBool,
    debounce: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncScheduler {
    /// Creates a scheduler for `engine`. The app starts in the foreground.
    pub fn new(engine: Arc<SyncEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            foreground: AtomicBool::new(true),
            debounce: Mutex::new(None),
            ticker: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Requests a pass after the debounce window.
    ///
    /// A pending countdown is cancelled and restarted. Once the countdown
    /// elapses the pass runs on its own task, so a later `schedule` never
    /// cancels a pass that has already begun.
    pub fn schedule(&self) {
        let engine = Arc::clone(&self.engine);
        let delay = engine.config().debounce();

        let mut pending = lock(&self.debounce);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            tokio::spawn(async move {
                engine.trigger_sync(false).await;
            });
        }));
    }

    /// Starts the interval trigger. Restarting replaces the previous ticker.
    pub fn start(self: &Arc<Self>) {
        let scheduler = Arc::downgrade(self);
        let period = self.engine.config().tick_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                if scheduler.is_due() {
                    debug!("Last sync is stale, scheduling a pass");
                    scheduler.schedule();
                }
            }
        });

        if let Some(previous) = lock(&self.ticker).replace(handle) {
            previous.abort();
        }
    }

    /// Whether the interval trigger would schedule a pass right now.
    ///
    /// Never-synced users are always due.
    pub fn is_due(&self) -> bool {
        let status = self.engine.status();
        if !status.is_sync_enabled || status.is_syncing {
            return false;
        }
        let Some(last_sync) = status.last_sync else {
            return true;
        };
        let threshold = self
            .engine
            .config()
            .staleness_threshold(self.is_foreground());
        self.engine.clock().now().duration_since(last_sync) > threshold
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    /// The app returned to the foreground: catch up right away.
    pub fn on_foreground(&self) {
        self.set_foreground(true);
        self.schedule();
    }

    /// Runs an incremental pass now (pull-to-refresh).
    pub async fn sync_now(&self) -> SyncOutcome {
        self.engine.trigger_sync(false).await
    }

    /// Re-downloads everything, ignoring the watermark.
    pub async fn force_full_resync(&self) -> SyncOutcome {
        self.engine.trigger_sync(true).await
    }

    /// Whether a debounced pass is still counting down.
    pub fn has_pending(&self) -> bool {
        lock(&self.debounce)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the ticker and any pending countdown. A pass already running
    /// finishes.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.debounce).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
        debug!("Sync scheduler stopped");
    }
}
