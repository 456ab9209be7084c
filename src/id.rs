use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a snapshot, rendered on disk as
/// `<index>-<term>-<processedPosition>-<exportedPosition>`.
///
/// Ordering is lexicographic on the four fields in declaration order, with
/// `index` as the primary key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SnapshotId {
    pub index: u64,
    pub term: u64,
    pub processed_position: u64,
    pub exported_position: u64,
}

impl SnapshotId {
    pub fn new(index: u64, term: u64, processed_position: u64, exported_position: u64) -> Self {
        Self {
            index,
            term,
            processed_position,
            exported_position,
        }
    }

    /// Parses a canonical snapshot file name. Returns `None` for anything
    /// that is not exactly four dash-separated decimal components.
    pub fn parse(name: &str) -> Option<Self> {
        let mut fields = [0u64; 4];
        let mut count = 0;
        for part in name.split('-') {
            if count == 4 {
                return None;
            }
            fields[count] = parse_decimal(part)?;
            count += 1;
        }
        if count != 4 {
            return None;
        }
        Some(Self {
            index: fields[0],
            term: fields[1],
            processed_position: fields[2],
            exported_position: fields[3],
        })
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.index, self.term, self.processed_position, self.exported_position
        )
    }
}

fn parse_decimal(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}
