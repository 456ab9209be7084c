use log::info;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::checksum;
use crate::error::SnapshotStoreError;
use crate::executor::Completion;
use crate::fsutil;
use crate::id::SnapshotId;
use crate::layout::SnapshotLayout;
use crate::persisted::PersistedSnapshot;
use crate::store::StoreInner;

/// Staging handle for a snapshot under construction.
///
/// Created by [`crate::SnapshotStore::new_transient_snapshot`]; owns the
/// staging directory `pending/<id>/` for the lifetime of the transaction and
/// ends in exactly one of persisted, aborted, or invalidated-by-purge.
pub struct TransientSnapshot {
    store: Arc<StoreInner>,
    state: Arc<TransientState>,
}

pub(crate) struct TransientState {
    pub(crate) id: SnapshotId,
    staging: PathBuf,
    staging_checksum: PathBuf,
    phase: Mutex<Phase>,
}

#[derive(Clone)]
enum Phase {
    New,
    TakeRequested,
    Taken,
    TakeFailed,
    Persisted(PersistedSnapshot),
    Aborted,
    Invalidated,
}

impl TransientState {
    pub(crate) fn new(id: SnapshotId, layout: &SnapshotLayout) -> Self {
        Self {
            id,
            staging: layout.pending_path(&id),
            staging_checksum: layout.pending_checksum_path(&id),
            phase: Mutex::new(Phase::New),
        }
    }

    /// Marks the handle unusable; a persisted handle keeps its result.
    pub(crate) fn invalidate(&self) {
        let mut phase = self.phase.lock();
        if !matches!(*phase, Phase::Persisted(_)) {
            *phase = Phase::Invalidated;
        }
    }

    fn discard_staging(&self) {
        fsutil::delete_best_effort(&self.staging);
        fsutil::delete_best_effort(&self.staging_checksum);
    }
}

impl TransientSnapshot {
    pub(crate) fn new(store: Arc<StoreInner>, state: Arc<TransientState>) -> Self {
        Self { store, state }
    }

    pub fn id(&self) -> SnapshotId {
        self.state.id
    }

    /// Runs `writer` on the store executor to populate the staging path.
    ///
    /// The staging path is handed to the writer without being created; a
    /// writer that decides to skip the snapshot may return `true` without
    /// writing anything, in which case `persist` later fails as not valid.
    /// Returning `false` or panicking abandons the snapshot and removes any
    /// partially written staging. A second `take` on the same handle fails
    /// with [`SnapshotStoreError::AlreadyTaken`].
    pub fn take<F>(&self, writer: F) -> Completion<()>
    where
        F: FnOnce(&Path) -> bool + Send + 'static,
    {
        {
            let mut phase = self.state.phase.lock();
            match *phase {
                Phase::New => *phase = Phase::TakeRequested,
                Phase::Invalidated => {
                    return Completion::failed(SnapshotStoreError::not_valid(
                        "snapshot was invalidated by a purge",
                    ))
                }
                _ => return Completion::failed(SnapshotStoreError::AlreadyTaken),
            }
        }
        let state = Arc::clone(&self.state);
        self.store.submit(move |store| run_take(store, &state, writer))
    }

    /// Promotes the staging directory into the committed area.
    ///
    /// Runs the full durability sequence on the store executor: checksum,
    /// sidecar, fsyncs, atomic rename, retirement of the previous committed
    /// snapshot and of stale staging entries, then listener notification.
    /// Idempotent: once persisted, the handle keeps returning an equal
    /// [`PersistedSnapshot`] without touching the filesystem again.
    pub fn persist(&self) -> Completion<PersistedSnapshot> {
        let state = Arc::clone(&self.state);
        self.store.submit(move |store| run_persist(store, &state))
    }

    /// Removes the staging directory and marks the handle terminal.
    /// Aborting a never-taken or already-persisted handle is a no-op.
    pub fn abort(&self) -> Completion<()> {
        let state = Arc::clone(&self.state);
        self.store.submit(move |store| run_abort(store, &state))
    }
}

impl fmt::Debug for TransientSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientSnapshot")
            .field("id", &self.state.id)
            .finish_non_exhaustive()
    }
}

fn run_take<F>(
    store: &Arc<StoreInner>,
    state: &TransientState,
    writer: F,
) -> Result<(), SnapshotStoreError>
where
    F: FnOnce(&Path) -> bool,
{
    if store.halted() {
        return Err(store.halted_error());
    }
    if matches!(*state.phase.lock(), Phase::Invalidated) {
        return Err(SnapshotStoreError::not_valid(
            "snapshot was invalidated by a purge",
        ));
    }
    match panic::catch_unwind(AssertUnwindSafe(|| writer(&state.staging))) {
        Ok(true) => {
            *state.phase.lock() = Phase::Taken;
            Ok(())
        }
        Ok(false) => {
            state.discard_staging();
            *state.phase.lock() = Phase::TakeFailed;
            Err(SnapshotStoreError::TakeFailed {
                reason: "writer abandoned the snapshot".to_string(),
            })
        }
        Err(payload) => {
            state.discard_staging();
            *state.phase.lock() = Phase::TakeFailed;
            Err(SnapshotStoreError::TakeFailed {
                reason: panic_reason(payload.as_ref()),
            })
        }
    }
}

fn run_persist(
    store: &Arc<StoreInner>,
    state: &Arc<TransientState>,
) -> Result<PersistedSnapshot, SnapshotStoreError> {
    if store.halted() {
        return Err(store.halted_error());
    }
    {
        let phase = state.phase.lock();
        match &*phase {
            Phase::Persisted(snapshot) => return Ok(snapshot.clone()),
            Phase::Taken => {}
            Phase::Invalidated => {
                return Err(SnapshotStoreError::not_valid(
                    "snapshot was invalidated by a purge",
                ))
            }
            Phase::New | Phase::TakeRequested => {
                return Err(SnapshotStoreError::not_valid("snapshot was never taken"))
            }
            Phase::TakeFailed => {
                return Err(SnapshotStoreError::not_valid("snapshot writer failed"))
            }
            Phase::Aborted => {
                return Err(SnapshotStoreError::not_valid("snapshot was aborted"))
            }
        }
    }

    let previous = store.latest();
    if let Some(previous) = &previous {
        if state.id == previous.id() {
            // already committed under this id; keep the committed state
            state.discard_staging();
            store.remove_pending_handle(&state.id);
            *state.phase.lock() = Phase::Persisted(previous.clone());
            return Ok(previous.clone());
        }
        if state.id < previous.id() {
            state.discard_staging();
            store.remove_pending_handle(&state.id);
            *state.phase.lock() = Phase::Invalidated;
            return Err(SnapshotStoreError::not_valid(format!(
                "snapshot {} would regress latest {}",
                state.id,
                previous.id()
            )));
        }
    }

    let target = store.layout.snapshot_path(&state.id);
    let checksum_target = store.layout.checksum_path(&state.id);

    let staging_present = match fs::read_dir(&state.staging) {
        Ok(mut entries) => {
            if entries.next().is_none() {
                state.discard_staging();
                store.remove_pending_handle(&state.id);
                *state.phase.lock() = Phase::Invalidated;
                return Err(SnapshotStoreError::not_valid("staging directory is empty"));
            }
            true
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err.into()),
    };
    if !staging_present && !target.exists() {
        store.remove_pending_handle(&state.id);
        *state.phase.lock() = Phase::Invalidated;
        return Err(SnapshotStoreError::not_valid(
            "staging directory does not exist",
        ));
    }

    let committed_checksum = if target.exists() {
        // an earlier promotion of this id already moved the staging (for
        // example when the final fsync failed mid-persist); adopt the
        // committed directory instead of renaming again
        match checksum::read_sidecar(&checksum_target) {
            Ok(value) => {
                state.discard_staging();
                value
            }
            Err(_) => {
                // orphan without a usable sidecar; clear both halves so a
                // retry can promote the staging again
                fsutil::delete_best_effort(&target);
                fsutil::delete_best_effort(&checksum_target);
                return Err(SnapshotStoreError::AlreadyExists { path: target });
            }
        }
    } else {
        let checksum = checksum::combined_checksum(&state.staging)?;
        checksum::write_sidecar(&state.staging_checksum, checksum)?;
        fsutil::fsync_tree(&state.staging)?;
        if let Err(err) = fsutil::atomic_move(&state.staging, &target) {
            state.discard_staging();
            return Err(err.into());
        }
        if let Err(err) = fsutil::atomic_move(&state.staging_checksum, &checksum_target) {
            // the committed directory has no sidecar yet; undo the promotion
            // so recovery is not required to repair the tree
            if fsutil::delete_recursively(&target).is_err() {
                store.halt("sidecar promotion failed and the orphan directory remains");
            }
            state.discard_staging();
            return Err(err.into());
        }
        fsutil::fsync_directory(&store.layout.snapshots_dir())?;
        checksum
    };

    if let Some(previous) = &previous {
        fsutil::delete_best_effort(previous.path());
        fsutil::delete_best_effort(previous.checksum_path());
    }

    store.sweep_stale_pending(state.id);
    store.remove_pending_handle(&state.id);

    let snapshot = PersistedSnapshot::new(state.id, target, checksum_target, committed_checksum);
    *state.phase.lock() = Phase::Persisted(snapshot.clone());
    store.publish_latest(snapshot.clone());
    info!(
        "event=snapshot_persisted id={} checksum={:#018x}",
        state.id, committed_checksum
    );
    store.notify_listeners(&snapshot);
    Ok(snapshot)
}

fn run_abort(store: &Arc<StoreInner>, state: &Arc<TransientState>) -> Result<(), SnapshotStoreError> {
    if store.halted() {
        return Err(store.halted_error());
    }
    {
        let mut phase = state.phase.lock();
        match &*phase {
            Phase::Persisted(_) | Phase::Aborted => return Ok(()),
            _ => *phase = Phase::Aborted,
        }
    }
    state.discard_staging();
    store.remove_pending_handle(&state.id);
    info!("event=snapshot_aborted id={}", state.id);
    Ok(())
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "writer panicked".to_string()
    }
}
