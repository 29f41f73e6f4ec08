//! One-directional backup of entity collections into the flat store.
//!
//! The document store is the system of record. After every successful write
//! the full collection is copied to its legacy flat key so an older reader,
//! or a downgrade that never ran the migration, still sees consistent data.
//! Nothing is ever read back from the replica.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::store::KeyValueStore;

pub struct BackupReplica {
    kv: Arc<KeyValueStore>,
}

impl BackupReplica {
    pub fn new(kv: Arc<KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Overwrite `key` with the whole collection. Failures are logged only;
    /// the record write has already succeeded.
    pub async fn mirror<T: Serialize>(&self, key: &str, records: &[T]) -> bool {
        match self.kv.set_json(key, records).await {
            Ok(()) => {
                debug!(key, count = records.len(), "Mirrored collection to backup");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to mirror collection to backup");
                false
            }
        }
    }

    /// Drop a mirrored collection whose source no longer exists.
    pub async fn remove(&self, key: &str) -> bool {
        match self.kv.remove(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "Failed to remove backup key");
                false
            }
        }
    }
}
