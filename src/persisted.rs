use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::id::SnapshotId;

/// Immutable handle to a committed snapshot and its checksum sidecar.
///
/// Cheap to clone; equality is by snapshot id.
#[derive(Debug, Clone)]
pub struct PersistedSnapshot {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: SnapshotId,
    path: PathBuf,
    checksum_path: PathBuf,
    checksum: u64,
}

impl PersistedSnapshot {
    pub(crate) fn new(id: SnapshotId, path: PathBuf, checksum_path: PathBuf, checksum: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                path,
                checksum_path,
                checksum,
            }),
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.inner.id
    }

    pub fn index(&self) -> u64 {
        self.inner.id.index
    }

    pub fn term(&self) -> u64 {
        self.inner.id.term
    }

    pub fn processed_position(&self) -> u64 {
        self.inner.id.processed_position
    }

    pub fn exported_position(&self) -> u64 {
        self.inner.id.exported_position
    }

    /// Directory holding the committed snapshot files.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The 8-byte big-endian sidecar next to [`Self::path`].
    pub fn checksum_path(&self) -> &Path {
        &self.inner.checksum_path
    }

    pub fn checksum(&self) -> u64 {
        self.inner.checksum
    }
}

impl PartialEq for PersistedSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for PersistedSnapshot {}
