use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::media::{classify, sort_in_frame_order, MediaKind};

/// Every regular file below `dir`, in frame order. Symlinked directories are not followed.
pub fn walk_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    sort_in_frame_order(&mut files);
    Ok(files)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Files below `dir` of the given kind, in frame order.
pub fn find_media(dir: &Path, kind: MediaKind) -> io::Result<Vec<PathBuf>> {
    Ok(walk_files(dir)?
        .into_iter()
        .filter(|path| classify(path) == kind)
        .collect())
}

/// Recursively copies `source` into `target`, creating directories as needed.
pub fn copy_dir_recursive(source: &Path, target: &Path) -> io::Result<u64> {
    fs::create_dir_all(target)?;
    let mut copied: u64 = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied = copied.saturating_add(copy_dir_recursive(&from, &to)?);
        } else {
            fs::copy(&from, &to)?;
            copied = copied.saturating_add(1);
        }
    }
    Ok(copied)
}

/// Copies a single file, creating the parent directory of `target` first.
pub fn copy_file_into(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)?;
    Ok(())
}

/// Removes a file, or a directory if it is empty.
pub fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(_) if path.is_dir() => fs::remove_dir(path),
        Err(err) => Err(err),
    }
}
