//! Runs blocking store calls off the async executor.

use crate::error::SyncResult;
use std::sync::Arc;
use tyl_storage::{LocalStore, StorageResult};

pub(crate) async fn with_store<T, F>(store: &Arc<dyn LocalStore>, f: F) -> SyncResult<T>
where
    F: FnOnce(&dyn LocalStore) -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await??)
}
