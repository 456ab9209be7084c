//! File-backed snapshot persistence for replicated state machine partitions.
//!
//! A [`SnapshotStore`] accepts checkpoints of a partition's state through a
//! two-phase staging transaction ([`TransientSnapshot`]), writes them durably
//! under `pending/`, verifies them with an 8-byte checksum sidecar, and
//! atomically promotes them into `snapshots/`, keeping at most one committed
//! snapshot per partition. Crash recovery on open restores the greatest
//! verified snapshot and deletes everything else.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod checksum;
pub mod error;
mod executor;
pub mod factory;
pub mod fsutil;
pub mod id;
pub mod layout;
pub mod persisted;
pub mod store;
pub mod transient;

pub use checksum::{
    combined_checksum, read_sidecar, verify_directory, write_sidecar, ChecksumError,
};
pub use error::SnapshotStoreError;
pub use executor::Completion;
pub use factory::SnapshotStoreFactory;
pub use fsutil::{atomic_move, delete_recursively, MoveError};
pub use id::SnapshotId;
pub use layout::{SnapshotLayout, PENDING_DIRECTORY, SNAPSHOTS_DIRECTORY};
pub use persisted::PersistedSnapshot;
pub use store::{SnapshotListener, SnapshotStore};
pub use transient::TransientSnapshot;
