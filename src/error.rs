use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::checksum::ChecksumError;
use crate::fsutil::MoveError;

/// Failure surface of the snapshot store. Carried through [`crate::Completion`],
/// so the type is cheap to clone (`io::Error` is shared behind an `Arc`).
#[derive(Debug, Clone, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot is not valid: {reason}")]
    NotValid { reason: String },
    #[error("snapshot writer failed: {reason}")]
    TakeFailed { reason: String },
    #[error("snapshot was already taken")]
    AlreadyTaken,
    #[error("snapshot target already exists: {path:?}")]
    AlreadyExists { path: PathBuf },
    #[error("snapshot data is corrupt: {path:?}")]
    Corrupt { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
    #[error("snapshot store is closed")]
    Closed,
}

impl SnapshotStoreError {
    pub(crate) fn not_valid(reason: impl Into<String>) -> Self {
        SnapshotStoreError::NotValid {
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for SnapshotStoreError {
    fn from(err: io::Error) -> Self {
        SnapshotStoreError::Io(Arc::new(err))
    }
}

impl From<ChecksumError> for SnapshotStoreError {
    fn from(err: ChecksumError) -> Self {
        match err {
            ChecksumError::Io(err) => SnapshotStoreError::Io(Arc::new(err)),
            ChecksumError::InvalidSidecar { path } => SnapshotStoreError::Corrupt { path },
            ChecksumError::Mismatch { path, .. } => SnapshotStoreError::Corrupt { path },
        }
    }
}

impl From<MoveError> for SnapshotStoreError {
    fn from(err: MoveError) -> Self {
        match err {
            MoveError::AlreadyExists { path } => SnapshotStoreError::AlreadyExists { path },
            MoveError::Io(err) => SnapshotStoreError::Io(Arc::new(err)),
        }
    }
}
