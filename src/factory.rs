use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::SnapshotStoreError;
use crate::store::SnapshotStore;

/// Creates and caches one [`SnapshotStore`] per partition under a shared
/// root directory. Each partition's store lives at `<root>/<partition_id>/`
/// and repeated lookups return the same store.
pub struct SnapshotStoreFactory {
    root: PathBuf,
    stores: Mutex<HashMap<String, SnapshotStore>>,
}

impl SnapshotStoreFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the store for `partition_id`, opening (and recovering) it on
    /// first use.
    pub fn get_or_open(&self, partition_id: &str) -> Result<SnapshotStore, SnapshotStoreError> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(partition_id) {
            return Ok(store.clone());
        }
        let store = SnapshotStore::open(self.root.join(partition_id))?;
        stores.insert(partition_id.to_string(), store.clone());
        Ok(store)
    }

    /// Returns the store for `partition_id` if it was already opened.
    pub fn get(&self, partition_id: &str) -> Option<SnapshotStore> {
        self.stores.lock().get(partition_id).cloned()
    }

    /// Closes every cached store and forgets it.
    pub fn close_all(&self) {
        let stores = std::mem::take(&mut *self.stores.lock());
        for store in stores.into_values() {
            store.close();
        }
    }
}
