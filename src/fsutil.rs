use log::warn;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const DELETE_MAX_ATTEMPTS: usize = 3;
const DELETE_BACKOFF: Duration = Duration::from_millis(20);

pub fn ensure_directory_exists(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

pub fn fsync_file(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

pub fn fsync_directory(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

/// Fsyncs every regular file below `dir`, then the directory itself.
pub fn fsync_tree(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fsync_tree(&entry.path())?;
        } else if file_type.is_file() {
            fsync_file(&entry.path())?;
        }
    }
    fsync_directory(dir)
}

/// Renames `src` to `dst`, refusing to overwrite an existing target, and
/// fsyncs the parent directory of `dst` so the move is durable.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<(), MoveError> {
    if dst.exists() {
        return Err(MoveError::AlreadyExists {
            path: dst.to_path_buf(),
        });
    }
    fs::rename(src, dst)?;
    if let Some(parent) = dst.parent() {
        fsync_directory(parent)?;
    }
    Ok(())
}

/// Removes a file or directory tree. A missing path is success. Transient
/// errors are retried a bounded number of times; the final error is
/// returned so callers can decide whether the failure is fatal.
pub fn delete_recursively(path: &Path) -> io::Result<()> {
    let mut attempt = 0;
    loop {
        match remove_path(path) {
            Ok(()) => return Ok(()),
            Err(err) if is_transient(&err) && attempt + 1 < DELETE_MAX_ATTEMPTS => {
                attempt += 1;
                warn!(
                    "event=recursive_delete_retry path={} attempt={} error={}",
                    path.display(),
                    attempt,
                    err
                );
                thread::sleep(DELETE_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}

/// `delete_recursively` for cleanup paths where failure must not abort the
/// caller. Failures are logged and swallowed.
pub fn delete_best_effort(path: &Path) {
    if let Err(err) = delete_recursively(path) {
        warn!(
            "event=recursive_delete_failed path={} error={}",
            path.display(),
            err
        );
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("rename target already exists: {path:?}")]
    AlreadyExists { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_move_refuses_existing_target() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dst).unwrap();
        assert!(matches!(
            atomic_move(&src, &dst),
            Err(MoveError::AlreadyExists { .. })
        ));
        assert!(src.exists());
    }

    #[test]
    fn atomic_move_moves_directory_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("file.txt"), b"payload").unwrap();
        let dst = tmp.path().join("dst");
        atomic_move(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("file.txt")).unwrap(), b"payload");
    }

    #[test]
    fn delete_recursively_tolerates_missing_path() {
        let tmp = TempDir::new().unwrap();
        delete_recursively(&tmp.path().join("missing")).unwrap();
    }

    #[test]
    fn delete_recursively_removes_nested_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tree");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested/file.txt"), b"x").unwrap();
        delete_recursively(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn delete_recursively_removes_single_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        delete_recursively(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn fsync_tree_touches_every_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tree");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("nested/b.txt"), b"b").unwrap();
        fsync_tree(&root).unwrap();
    }
}
