//! Wiring of the sync components for one app session.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::gateway::MutationGateway;
use crate::notifier::ChangeNotifier;
use crate::remote::RemoteStore;
use crate::scheduler::SyncScheduler;
use crate::state::SyncStatus;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tyl_storage::LocalStore;
use tyl_types::UserId;

/// Owns the engine, scheduler, gateway and notifier for one store.
///
/// Must be created inside a tokio runtime: construction spawns the change
/// listener and the interval ticker. Dropping the service stops both.
pub struct SyncService {
    engine: Arc<SyncEngine>,
    scheduler: Arc<SyncScheduler>,
    gateway: MutationGateway,
    notifier: ChangeNotifier,
    listener: JoinHandle<()>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(store, remote, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&clock),
            config,
        ));
        let scheduler = SyncScheduler::new(Arc::clone(&engine));
        scheduler.start();

        let gateway = MutationGateway::new(Arc::clone(&store), Arc::clone(&scheduler), clock);
        let notifier = ChangeNotifier::new();
        let listener = notifier.spawn_listener(store);

        Self {
            engine,
            scheduler,
            gateway,
            notifier,
            listener,
        }
    }

    /// Signs `user_id` in and schedules a first pass. `None` signs out.
    pub async fn login(&self, user_id: Option<UserId>) -> SyncResult<()> {
        self.engine.enable(user_id).await?;
        if self.engine.status().is_sync_enabled {
            self.scheduler.schedule();
        }
        Ok(())
    }

    pub fn logout(&self) {
        self.engine.disable();
        info!("User signed out, sync disabled");
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Receiver for status transitions.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.engine.subscribe_status()
    }

    /// Stops background tasks. Idempotent.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.listener.abort();
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
