use std::io;
use std::path::{Path, PathBuf};

use crate::fsutil;
use crate::id::SnapshotId;

/// Name of the committed-snapshot directory under the partition root.
pub const SNAPSHOTS_DIRECTORY: &str = "snapshots";
/// Name of the staging directory under the partition root.
pub const PENDING_DIRECTORY: &str = "pending";

const CHECKSUM_SUFFIX: &str = ".checksum";

/// Canonical on-disk layout rooted at a partition directory:
///
/// ```text
/// <root>/
///   snapshots/<id>/          committed snapshot
///   snapshots/<id>.checksum  8-byte sidecar
///   pending/<id>/            staging
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIRECTORY)
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root.join(PENDING_DIRECTORY)
    }

    pub fn snapshot_path(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots_dir().join(id.to_string())
    }

    pub fn checksum_path(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots_dir().join(sidecar_name(id))
    }

    pub fn pending_path(&self, id: &SnapshotId) -> PathBuf {
        self.pending_dir().join(id.to_string())
    }

    pub fn pending_checksum_path(&self, id: &SnapshotId) -> PathBuf {
        self.pending_dir().join(sidecar_name(id))
    }

    pub fn ensure(&self) -> io::Result<()> {
        fsutil::ensure_directory_exists(&self.snapshots_dir())?;
        fsutil::ensure_directory_exists(&self.pending_dir())
    }
}

fn sidecar_name(id: &SnapshotId) -> String {
    format!("{id}{CHECKSUM_SUFFIX}")
}

/// Parses `<id>.checksum` file names; plain `<id>` names do not match.
pub(crate) fn parse_sidecar_name(name: &str) -> Option<SnapshotId> {
    name.strip_suffix(CHECKSUM_SUFFIX).and_then(SnapshotId::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_follow_canonical_shape() {
        let layout = SnapshotLayout::new("/state/partition-1");
        let id = SnapshotId::new(1, 2, 3, 4);
        assert_eq!(
            layout.snapshot_path(&id),
            Path::new("/state/partition-1/snapshots/1-2-3-4")
        );
        assert_eq!(
            layout.checksum_path(&id),
            Path::new("/state/partition-1/snapshots/1-2-3-4.checksum")
        );
        assert_eq!(
            layout.pending_path(&id),
            Path::new("/state/partition-1/pending/1-2-3-4")
        );
        assert_eq!(
            layout.pending_checksum_path(&id),
            Path::new("/state/partition-1/pending/1-2-3-4.checksum")
        );
    }

    #[test]
    fn ensure_creates_both_directories() {
        let tmp = TempDir::new().unwrap();
        let layout = SnapshotLayout::new(tmp.path());
        layout.ensure().unwrap();
        assert!(layout.snapshots_dir().is_dir());
        assert!(layout.pending_dir().is_dir());
    }

    #[test]
    fn sidecar_names_parse_back_to_ids() {
        assert_eq!(
            parse_sidecar_name("1-2-3-4.checksum"),
            Some(SnapshotId::new(1, 2, 3, 4))
        );
        assert_eq!(parse_sidecar_name("1-2-3-4"), None);
        assert_eq!(parse_sidecar_name("garbage.checksum"), None);
    }
}
