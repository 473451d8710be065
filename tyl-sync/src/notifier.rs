//! Change notifier: routes row changes to the observers of that row.
//!
//! The store publishes bare `{table, rowid}` events. The listener spawned by
//! [`ChangeNotifier::spawn_listener`] re-fetches each changed row, derives its
//! [`SubscriptionKey`] and invokes every callback registered under that key.
//! Local writes and rows applied by sync take the same path. If the listener
//! falls behind and the channel drops events, every subscribed key is
//! re-read and notified with its current row.

use crate::blocking::with_store;
use crate::keys::{key_for, SubscriptionKey};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tyl_storage::{ChangeEvent, LocalStore, Row, StorageResult};

type Callback = Arc<dyn Fn(&Row) + Send + Sync>;

/// Handle of one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<SubscriptionKey, HashMap<SubscriptionId, Callback>>,
}

/// Publish/subscribe registry keyed by [`SubscriptionKey`].
///
/// Cheap to clone; clones share one registry.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    registry: Arc<Mutex<Registry>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Callbacks never run under this lock, so a poisoned registry is
        // still consistent.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `callback` under `key`.
    ///
    /// The callback stays registered until the returned handle's
    /// [`Unsubscribe::unsubscribe`] is called; dropping the handle does not
    /// unsubscribe.
    pub fn subscribe<F>(&self, key: SubscriptionKey, callback: F) -> Unsubscribe
    where
        F: Fn(&Row) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .subscribers
            .entry(key)
            .or_default()
            .insert(id, Arc::new(callback));
        debug!("Subscribed {:?} to {}", id, key);

        Unsubscribe {
            registry: Arc::downgrade(&self.registry),
            key,
            id,
        }
    }

    /// Invokes every callback registered under `key` with `row`.
    ///
    /// A panicking callback is logged and skipped; the rest still run.
    /// Returns the number of callbacks that completed.
    pub fn notify(&self, key: &SubscriptionKey, row: &Row) -> usize {
        let callbacks: Vec<Callback> = match self.registry().subscribers.get(key) {
            Some(callbacks) => callbacks.values().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(row))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Subscriber for {} panicked; continuing", key),
            }
        }
        delivered
    }

    /// Number of callbacks currently registered under `key`.
    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.registry()
            .subscribers
            .get(key)
            .map_or(0, HashMap::len)
    }

    /// Whether no callbacks are registered at all.
    pub fn is_empty(&self) -> bool {
        self.registry().subscribers.is_empty()
    }

    /// Spawns the task that turns store change events into notifications.
    ///
    /// Runs until the store's change channel closes or the handle is aborted.
    pub fn spawn_listener(&self, store: Arc<dyn LocalStore>) -> JoinHandle<()> {
        let mut changes = store.subscribe_changes();
        let notifier = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => notifier.dispatch(&store, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Change listener lagged, {} events dropped; refreshing all keys",
                            skipped
                        );
                        notifier.refresh_all(&store).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Change listener stopped");
        })
    }

    async fn dispatch(&self, store: &Arc<dyn LocalStore>, event: ChangeEvent) {
        let ChangeEvent { table, rowid } = event;
        match with_store(store, move |s| s.row_by_id(table, rowid)).await {
            Ok(Some(row)) => {
                let key = key_for(&row);
                let delivered = self.notify(&key, &row);
                debug!("Change {}#{} delivered to {} subscribers", table, rowid, delivered);
            }
            Ok(None) => debug!("Changed row {}#{} vanished before fetch", table, rowid),
            Err(e) => warn!("Failed to fetch changed row {}#{}: {}", table, rowid, e),
        }
    }

    /// Re-delivers the current row of every subscribed key.
    ///
    /// Used after the change stream dropped events, when it is unknown which
    /// rows those events pointed at.
    async fn refresh_all(&self, store: &Arc<dyn LocalStore>) {
        let keys: Vec<SubscriptionKey> = self.registry().subscribers.keys().copied().collect();
        if keys.is_empty() {
            return;
        }

        let rows = with_store(store, move |s| {
            let mut rows = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(row) = current_row(s, &key)? {
                    rows.push((key, row));
                }
            }
            Ok(rows)
        })
        .await;

        match rows {
            Ok(rows) => {
                for (key, row) in &rows {
                    self.notify(key, row);
                }
                debug!("Refreshed {} subscribed keys", rows.len());
            }
            Err(e) => warn!("Failed to refresh subscribed keys: {}", e),
        }
    }
}

/// Reads the row a key names, if it exists.
fn current_row(store: &dyn LocalStore, key: &SubscriptionKey) -> StorageResult<Option<Row>> {
    Ok(match *key {
        SubscriptionKey::Record { metric_id, date } => {
            store.get_record(&metric_id, date)?.map(Row::Record)
        }
        SubscriptionKey::Metric(id) => store.get_metric(&id)?.map(Row::Metric),
        SubscriptionKey::User(id) => store.get_profile(&id)?.map(Row::Profile),
    })
}

/// Removes one callback from the registry.
#[must_use = "dropping the handle leaves the callback registered"]
#[derive(Debug)]
pub struct Unsubscribe {
    registry: Weak<Mutex<Registry>>,
    key: SubscriptionKey,
    id: SubscriptionId,
}

impl Unsubscribe {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Removes the callback. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callbacks) = registry.subscribers.get_mut(&self.key) {
            callbacks.remove(&self.id);
            if callbacks.is_empty() {
                registry.subscribers.remove(&self.key);
            }
        }
    }
}
