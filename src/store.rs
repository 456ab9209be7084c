use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::checksum;
use crate::error::SnapshotStoreError;
use crate::executor::{Completion, PartitionExecutor};
use crate::fsutil;
use crate::id::SnapshotId;
use crate::layout::{self, SnapshotLayout};
use crate::persisted::PersistedSnapshot;
use crate::transient::{TransientSnapshot, TransientState};

/// Observer of newly committed snapshots. Implementations are expected not
/// to panic; a panic is caught and logged by the store.
pub trait SnapshotListener: Send + Sync {
    fn on_new_snapshot(&self, snapshot: &PersistedSnapshot);
}

/// Per-partition snapshot store.
///
/// `open` runs crash recovery synchronously, so a freshly opened store
/// always starts from a well-formed tree: at most one committed snapshot
/// (the one with the greatest id that verifies against its sidecar) and an
/// empty staging area. The filesystem under the root is owned exclusively
/// by one store instance for the lifetime of the process.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) layout: SnapshotLayout,
    executor: PartitionExecutor,
    latest: RwLock<Option<PersistedSnapshot>>,
    pending: Mutex<BTreeMap<SnapshotId, Arc<TransientState>>>,
    listeners: Mutex<Vec<Arc<dyn SnapshotListener>>>,
    closed: AtomicBool,
    halted: AtomicBool,
}

impl SnapshotStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SnapshotStoreError> {
        let layout = SnapshotLayout::new(root);
        let latest = recover(&layout)?;
        let partition = layout
            .root()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "partition".to_string());
        let executor = PartitionExecutor::spawn(format!("snapvault-{partition}"))?;
        match &latest {
            Some(snapshot) => info!(
                "event=snapshot_store_opened root={} latest={}",
                layout.root().display(),
                snapshot.id()
            ),
            None => info!(
                "event=snapshot_store_opened root={} latest=none",
                layout.root().display()
            ),
        }
        Ok(Self {
            inner: Arc::new(StoreInner {
                layout,
                executor,
                latest: RwLock::new(latest),
                pending: Mutex::new(BTreeMap::new()),
                listeners: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                halted: AtomicBool::new(false),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        self.inner.layout.root()
    }

    /// Registers a new staging transaction at the given position.
    ///
    /// Returns `None` when the id would not advance past the current latest
    /// snapshot, when a transaction for the same id is already tracked, or
    /// when the store is closed or halted. No directory is created yet; that
    /// is the writer's job during `take`.
    pub fn new_transient_snapshot(
        &self,
        index: u64,
        term: u64,
        processed_position: u64,
        exported_position: u64,
    ) -> Option<TransientSnapshot> {
        if self.inner.closed.load(Ordering::SeqCst) || self.inner.halted() {
            return None;
        }
        let id = SnapshotId::new(index, term, processed_position, exported_position);
        if let Some(latest) = self.inner.latest.read().as_ref() {
            if id <= latest.id() {
                info!(
                    "event=transient_snapshot_refused id={} latest={}",
                    id,
                    latest.id()
                );
                return None;
            }
        }
        let mut pending = self.inner.pending.lock();
        if pending.contains_key(&id) {
            info!("event=transient_snapshot_refused id={id} reason=pending_exists");
            return None;
        }
        let state = Arc::new(TransientState::new(id, &self.inner.layout));
        pending.insert(id, Arc::clone(&state));
        Some(TransientSnapshot::new(Arc::clone(&self.inner), state))
    }

    pub fn get_latest_snapshot(&self) -> Option<PersistedSnapshot> {
        self.inner.latest.read().clone()
    }

    /// Appends a listener; duplicates are allowed and notified in
    /// registration order.
    pub fn add_snapshot_listener(&self, listener: Arc<dyn SnapshotListener>) {
        self.inner.listeners.lock().push(listener);
    }

    /// Removes the first registered occurrence of `listener`.
    pub fn remove_snapshot_listener(&self, listener: &Arc<dyn SnapshotListener>) {
        let mut listeners = self.inner.listeners.lock();
        if let Some(position) = listeners
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, listener))
        {
            listeners.remove(position);
        }
    }

    /// Deletes all staging state and invalidates every outstanding
    /// transient handle. The committed snapshot is untouched.
    pub fn purge_pending_snapshots(&self) -> Completion<()> {
        self.inner.submit(move |store| {
            if store.halted() {
                return Err(store.halted_error());
            }
            store.invalidate_all_pending();
            store.clear_pending_dir();
            info!(
                "event=pending_purged root={}",
                store.layout.root().display()
            );
            Ok(())
        })
    }

    /// Invalidates outstanding transients and stops the executor. On-disk
    /// state is left as is. Subsequent mutating calls fail with `Closed`.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl StoreInner {
    pub(crate) fn submit<T, F>(self: &Arc<Self>, job: F) -> Completion<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Arc<StoreInner>) -> Result<T, SnapshotStoreError> + Send + 'static,
    {
        let completion = Completion::new();
        let job_completion = completion.clone();
        let store = Arc::clone(self);
        let submitted = self.executor.submit(Box::new(move || {
            job_completion.complete(job(&store));
        }));
        if let Err(err) = submitted {
            completion.complete(Err(err));
        }
        completion
    }

    pub(crate) fn latest(&self) -> Option<PersistedSnapshot> {
        self.latest.read().clone()
    }

    pub(crate) fn publish_latest(&self, snapshot: PersistedSnapshot) {
        *self.latest.write() = Some(snapshot);
    }

    pub(crate) fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn halt(&self, reason: &str) {
        self.halted.store(true, Ordering::SeqCst);
        error!(
            "event=snapshot_store_halted root={} reason={}",
            self.layout.root().display(),
            reason
        );
    }

    pub(crate) fn halted_error(&self) -> SnapshotStoreError {
        io::Error::other("snapshot store halted after an unrecoverable promotion failure").into()
    }

    pub(crate) fn remove_pending_handle(&self, id: &SnapshotId) {
        self.pending.lock().remove(id);
    }

    fn invalidate_all_pending(&self) {
        let handles = std::mem::take(&mut *self.pending.lock());
        for state in handles.into_values() {
            state.invalidate();
        }
    }

    fn clear_pending_dir(&self) {
        let pending_dir = self.layout.pending_dir();
        let entries = match fs::read_dir(&pending_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "event=pending_scan_failed path={} error={}",
                    pending_dir.display(),
                    err
                );
                return;
            }
        };
        for entry in entries.flatten() {
            fsutil::delete_best_effort(&entry.path());
        }
    }

    /// Drops staging entries (directories and stray sidecars) whose id is
    /// `<=` the newly committed one, and invalidates their handles. Entries
    /// with a strictly greater id still represent future progress and stay.
    pub(crate) fn sweep_stale_pending(&self, up_to: SnapshotId) {
        {
            let mut pending = self.pending.lock();
            let stale: Vec<SnapshotId> = pending.range(..=up_to).map(|(id, _)| *id).collect();
            for id in stale {
                if let Some(state) = pending.remove(&id) {
                    state.invalidate();
                }
            }
        }
        let pending_dir = self.layout.pending_dir();
        let entries = match fs::read_dir(&pending_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "event=pending_scan_failed path={} error={}",
                    pending_dir.display(),
                    err
                );
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let id = SnapshotId::parse(name).or_else(|| layout::parse_sidecar_name(name));
            if let Some(id) = id {
                if id <= up_to {
                    info!("event=stale_pending_removed id={id}");
                    fsutil::delete_best_effort(&entry.path());
                }
            }
        }
    }

    pub(crate) fn notify_listeners(&self, snapshot: &PersistedSnapshot) {
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            let notified =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_new_snapshot(snapshot)));
            if notified.is_err() {
                warn!("event=snapshot_listener_panic id={}", snapshot.id());
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.invalidate_all_pending();
        self.executor.shutdown();
        info!(
            "event=snapshot_store_closed root={}",
            self.layout.root().display()
        );
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Rebuilds a well-formed tree from whatever a crash left behind: keeps the
/// greatest committed snapshot that verifies against its sidecar, deletes
/// everything else, and clears the staging area.
fn recover(layout: &SnapshotLayout) -> Result<Option<PersistedSnapshot>, SnapshotStoreError> {
    layout.ensure()?;
    let snapshots_dir = layout.snapshots_dir();

    let mut directories: BTreeMap<SnapshotId, PathBuf> = BTreeMap::new();
    let mut sidecars: BTreeMap<SnapshotId, PathBuf> = BTreeMap::new();
    for entry in fs::read_dir(&snapshots_dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if file_type.is_dir() {
            if let Some(id) = SnapshotId::parse(&name) {
                directories.insert(id, path);
                continue;
            }
        } else if file_type.is_file() {
            if let Some(id) = layout::parse_sidecar_name(&name) {
                if entry.metadata()?.len() == checksum::SIDECAR_LEN {
                    sidecars.insert(id, path);
                    continue;
                }
            }
        }
        warn!(
            "event=recovery_discarded path={} reason=unrecognized",
            path.display()
        );
        fsutil::delete_best_effort(&path);
    }

    let mut survivors: Vec<(SnapshotId, PathBuf, PathBuf, u64)> = Vec::new();
    for (id, dir) in directories {
        let Some(sidecar) = sidecars.remove(&id) else {
            warn!(
                "event=recovery_discarded path={} reason=missing_sidecar",
                dir.display()
            );
            fsutil::delete_best_effort(&dir);
            continue;
        };
        match checksum::verify_directory(&dir, &sidecar) {
            Ok(value) => survivors.push((id, dir, sidecar, value)),
            Err(err) => {
                warn!(
                    "event=recovery_discarded path={} reason=corrupt error={}",
                    dir.display(),
                    err
                );
                fsutil::delete_best_effort(&dir);
                fsutil::delete_best_effort(&sidecar);
            }
        }
    }
    for sidecar in sidecars.into_values() {
        warn!(
            "event=recovery_discarded path={} reason=orphan_sidecar",
            sidecar.display()
        );
        fsutil::delete_best_effort(&sidecar);
    }

    // survivors are in ascending id order; the last one is the latest
    let latest = survivors.pop();
    for (_, dir, sidecar, _) in survivors {
        info!("event=recovery_superseded path={}", dir.display());
        fsutil::delete_best_effort(&dir);
        fsutil::delete_best_effort(&sidecar);
    }

    // staging never survives a restart
    for entry in fs::read_dir(&layout.pending_dir())?.flatten() {
        fsutil::delete_best_effort(&entry.path());
    }

    fsutil::fsync_directory(&snapshots_dir)?;
    fsutil::fsync_directory(layout.root())?;

    Ok(latest.map(|(id, dir, sidecar, value)| PersistedSnapshot::new(id, dir, sidecar, value)))
}
