use crc32fast::Hasher;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Size of a checksum sidecar file: one big-endian `u64`.
pub const SIDECAR_LEN: u64 = 8;

/// Computes the combined checksum of a snapshot directory.
///
/// All regular files below `dir` are fed into a single CRC-32, ordered by
/// their path relative to `dir` (bytewise). The 32-bit value is widened to
/// `u64` so the sidecar encoding stays a fixed 8 bytes.
pub fn combined_checksum(dir: &Path) -> Result<u64, ChecksumError> {
    let mut files = Vec::new();
    collect_regular_files(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];
    for (_, path) in &files {
        let mut file = File::open(path)?;
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }
    Ok(u64::from(hasher.finalize()))
}

/// Writes `value` as an 8-byte big-endian sidecar and fsyncs it.
pub fn write_sidecar(path: &Path, value: u64) -> Result<(), ChecksumError> {
    let mut file = File::create(path)?;
    file.write_all(&value.to_be_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Reads an 8-byte big-endian sidecar. Any other length is invalid.
pub fn read_sidecar(path: &Path) -> Result<u64, ChecksumError> {
    let bytes = fs::read(path)?;
    let bytes: [u8; 8] = bytes.try_into().map_err(|_| ChecksumError::InvalidSidecar {
        path: path.to_path_buf(),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Recomputes the checksum of `dir` and compares it against the sidecar.
pub fn verify_directory(dir: &Path, sidecar: &Path) -> Result<u64, ChecksumError> {
    let stored = read_sidecar(sidecar)?;
    let computed = combined_checksum(dir)?;
    if stored != computed {
        return Err(ChecksumError::Mismatch {
            path: dir.to_path_buf(),
            stored,
            computed,
        });
    }
    Ok(computed)
}

fn collect_regular_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<(Vec<u8>, PathBuf)>,
) -> Result<(), ChecksumError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_regular_files(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map(|rel| rel.to_string_lossy().into_owned().into_bytes())
                .unwrap_or_default();
            files.push((relative, path));
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("checksum sidecar {path:?} is not exactly 8 bytes")]
    InvalidSidecar { path: PathBuf },
    #[error("checksum mismatch for {path:?}: stored={stored:#018x} computed={computed:#018x}")]
    Mismatch {
        path: PathBuf,
        stored: u64,
        computed: u64,
    },
}
