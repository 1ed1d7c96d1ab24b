//! Shared async access to the archive
//!
//! SQLite calls block, so every operation runs on the blocking pool behind a
//! mutex. Readers in other processes are unaffected thanks to WAL mode.

use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::{StorageError, StorageResult};
use std::sync::{Arc, Mutex};

/// Cloneable handle to the single writer connection
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<SqliteStorage>>,
}

impl StoreHandle {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    /// Runs `f` against the storage on the blocking thread pool
    pub async fn call<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut SqliteStorage) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut storage = inner
                .lock()
                .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
            f(&mut storage)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_call_runs_against_shared_storage() {
        let handle = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let clone = handle.clone();

        let (id, created) = clone
            .call(|s| s.upsert_article("https://example.com/a", "s", "<p>x</p>", None))
            .await
            .unwrap();
        assert!(created);

        let known = handle
            .call(|s| s.is_known("https://example.com/a"))
            .await
            .unwrap();
        assert!(known);

        let article = handle.call(move |s| s.get_article(&id)).await.unwrap();
        assert_eq!(article.source_name, "s");
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let handle = StoreHandle::new(SqliteStorage::new_in_memory().unwrap());
        let result = handle.call(|s| s.get_article("missing")).await;
        assert!(matches!(result, Err(StorageError::ArticleNotFound(_))));
    }
}
