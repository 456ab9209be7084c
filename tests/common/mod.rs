#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Default writer used by most tests: creates the staging directory and a
/// single `file1.txt` inside it.
pub fn write_state(path: &Path) -> bool {
    write_state_with(path, b"This is the content")
}

pub fn write_state_with(path: &Path, content: &[u8]) -> bool {
    fs::create_dir_all(path).unwrap();
    fs::write(path.join("file1.txt"), content).unwrap();
    true
}

/// Entry names of `dir`, sorted, for compact directory assertions.
pub fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

/// Recursive `(relative path, content)` listing used to assert that an
/// operation left the tree untouched.
pub fn tree_contents(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    collect(root, root, &mut entries);
    entries.sort();
    entries
}

fn collect(root: &Path, dir: &Path, entries: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path: PathBuf = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        if entry.file_type().unwrap().is_dir() {
            entries.push((format!("{relative}/"), Vec::new()));
            collect(root, &path, entries);
        } else {
            entries.push((relative, fs::read(&path).unwrap()));
        }
    }
}
