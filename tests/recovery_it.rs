use snapvault::{combined_checksum, write_sidecar, SnapshotId, SnapshotStore};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

mod common;

/// Builds a committed snapshot directly on disk, bypassing the store, the
/// way a previous process would have left it.
fn plant_committed(root: &Path, id: SnapshotId, content: &[u8]) {
    let dir = root.join("snapshots").join(id.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("file1.txt"), content).unwrap();
    let checksum = combined_checksum(&dir).unwrap();
    write_sidecar(
        &root.join("snapshots").join(format!("{id}.checksum")),
        checksum,
    )
    .unwrap();
}

#[test]
fn reopen_restores_the_latest_snapshot() {
    let tmp = TempDir::new().unwrap();
    let persisted_id;
    {
        let store = SnapshotStore::open(tmp.path()).unwrap();
        let transient = store.new_transient_snapshot(3, 1, 2, 0).unwrap();
        transient.take(common::write_state).join().unwrap();
        persisted_id = transient.persist().join().unwrap().id();
        store.close();
    }

    let store = SnapshotStore::open(tmp.path()).unwrap();
    let latest = store.get_latest_snapshot().unwrap();
    assert_eq!(latest.id(), persisted_id);
    assert_eq!(
        fs::read(latest.path().join("file1.txt")).unwrap(),
        b"This is the content"
    );
    assert_eq!(
        fs::read(latest.checksum_path()).unwrap(),
        latest.checksum().to_be_bytes()
    );
}

#[test]
fn reopened_store_refuses_stale_ids() {
    let tmp = TempDir::new().unwrap();
    plant_committed(tmp.path(), SnapshotId::new(5, 1, 1, 1), b"state");

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert!(store.new_transient_snapshot(5, 1, 1, 1).is_none());
    assert!(store.new_transient_snapshot(4, 9, 9, 9).is_none());
    assert!(store.new_transient_snapshot(6, 0, 0, 0).is_some());
}

#[test]
fn bootstrap_removes_directory_without_sidecar() {
    let tmp = TempDir::new().unwrap();
    let orphan = tmp.path().join("snapshots/1-0-0-0");
    fs::create_dir_all(&orphan).unwrap();
    fs::write(orphan.join("file1.txt"), b"unverifiable").unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert!(store.get_latest_snapshot().is_none());
    assert!(common::is_empty_dir(&tmp.path().join("snapshots")));
}

#[test]
fn bootstrap_removes_orphan_sidecar() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("snapshots")).unwrap();
    write_sidecar(&tmp.path().join("snapshots/1-0-0-0.checksum"), 42).unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert!(store.get_latest_snapshot().is_none());
    assert!(common::is_empty_dir(&tmp.path().join("snapshots")));
}

#[test]
fn bootstrap_removes_corrupt_snapshot() {
    let tmp = TempDir::new().unwrap();
    plant_committed(tmp.path(), SnapshotId::new(1, 0, 0, 0), b"pristine");
    fs::write(
        tmp.path().join("snapshots/1-0-0-0/file1.txt"),
        b"tampered",
    )
    .unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert!(store.get_latest_snapshot().is_none());
    assert!(common::is_empty_dir(&tmp.path().join("snapshots")));
}

#[test]
fn bootstrap_removes_sidecar_with_wrong_length() {
    let tmp = TempDir::new().unwrap();
    plant_committed(tmp.path(), SnapshotId::new(1, 0, 0, 0), b"state");
    // truncate the sidecar; both halves must go
    fs::write(tmp.path().join("snapshots/1-0-0-0.checksum"), b"1234567").unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert!(store.get_latest_snapshot().is_none());
    assert!(common::is_empty_dir(&tmp.path().join("snapshots")));
}

#[test]
fn bootstrap_keeps_the_greatest_verified_snapshot() {
    let tmp = TempDir::new().unwrap();
    plant_committed(tmp.path(), SnapshotId::new(1, 0, 0, 0), b"older");
    plant_committed(tmp.path(), SnapshotId::new(2, 0, 0, 0), b"newer");
    plant_committed(tmp.path(), SnapshotId::new(3, 0, 0, 0), b"corrupt-me");
    fs::write(
        tmp.path().join("snapshots/3-0-0-0/file1.txt"),
        b"tampered",
    )
    .unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    let latest = store.get_latest_snapshot().unwrap();
    assert_eq!(latest.id(), SnapshotId::new(2, 0, 0, 0));
    assert_eq!(
        common::sorted_names(&tmp.path().join("snapshots")),
        vec!["2-0-0-0", "2-0-0-0.checksum"]
    );
}

#[test]
fn bootstrap_removes_unrecognized_entries() {
    let tmp = TempDir::new().unwrap();
    plant_committed(tmp.path(), SnapshotId::new(1, 0, 0, 0), b"state");
    let snapshots = tmp.path().join("snapshots");
    fs::write(snapshots.join("garbage.txt"), b"noise").unwrap();
    fs::create_dir(snapshots.join("not-a-snapshot")).unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert_eq!(
        store.get_latest_snapshot().unwrap().id(),
        SnapshotId::new(1, 0, 0, 0)
    );
    assert_eq!(
        common::sorted_names(&snapshots),
        vec!["1-0-0-0", "1-0-0-0.checksum"]
    );
}

#[test]
fn bootstrap_clears_pending() {
    let tmp = TempDir::new().unwrap();
    let stale = tmp.path().join("pending/4-0-0-0");
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("file1.txt"), b"half-written").unwrap();
    fs::write(tmp.path().join("pending/4-0-0-0.checksum"), b"12345678").unwrap();

    let store = SnapshotStore::open(tmp.path()).unwrap();

    assert!(store.get_latest_snapshot().is_none());
    assert!(common::is_empty_dir(&tmp.path().join("pending")));
}
