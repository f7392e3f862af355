use std::path::{Component, Path, PathBuf};

use common::error::AppError;
use tracing::{debug, warn};
use url::Url;

use super::{
    fs::{copy_dir_recursive, copy_file_into, remove_entry},
    media::{classify, classify_name, MediaKind},
    remote::{file_name_for, RemoteFetcher},
    validation::FileCounts,
};

/// One entry to copy from the share into the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareCopy {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: MediaKind,
}

/// One remote file to download into the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDownload {
    pub url: Url,
    pub target: PathBuf,
}

/// Result of collecting an upload: what it contains, and what still has to be
/// copied or downloaded once the combination is known to be valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcedEntries {
    pub counts: FileCounts,
    pub share_copies: Vec<ShareCopy>,
    pub downloads: Vec<RemoteDownload>,
}

/// Joins a user supplied relative path onto `root`, rejecting anything that
/// could escape it.
pub fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf, AppError> {
    let relative_path = Path::new(relative);
    let mut resolved = root.to_path_buf();
    let mut depth = 0_usize;
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth = depth.saturating_add(1);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::Validation(format!(
                    "path must stay inside its root: {relative}"
                )));
            }
        }
    }

    if depth == 0 {
        return Err(AppError::Validation(format!("empty path: {relative:?}")));
    }
    Ok(resolved)
}

/// Counts client uploads already placed below `upload_dir` and deletes entries
/// that are neither image, video nor archive.
pub async fn source_client_files(
    upload_dir: &Path,
    names: &[String],
    counts: &mut FileCounts,
) -> Result<(), AppError> {
    for name in names {
        let path = resolve_relative(upload_dir, name)?;
        let kind = classify_name(&path);
        if matches!(kind, MediaKind::Image | MediaKind::Video | MediaKind::Archive) {
            counts.record(kind);
            continue;
        }

        let target = path.clone();
        match tokio::task::spawn_blocking(move || remove_entry(&target)).await? {
            Ok(()) => debug!(path = %path.display(), "removed unsupported upload"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove unsupported upload"),
        }
    }
    Ok(())
}

/// Classifies share entries on the share itself and plans their copy into
/// `upload_dir`. A directory is skipped when another selected file lives
/// below it, since that file is copied on its own.
pub fn plan_share_copies(
    share_root: &Path,
    upload_dir: &Path,
    server_files: &[String],
    counts: &mut FileCounts,
) -> Result<Vec<ShareCopy>, AppError> {
    let mut directories = Vec::new();
    let mut files = Vec::new();

    for relative in server_files {
        let source = resolve_relative(share_root, relative)?;
        let target = resolve_relative(upload_dir, relative)?;
        let kind = classify(&source);
        let copy = ShareCopy {
            source,
            target,
            kind,
        };
        match kind {
            MediaKind::Directory => directories.push(copy),
            MediaKind::Image | MediaKind::Video | MediaKind::Archive => files.push(copy),
            MediaKind::Empty => debug!(path = %copy.source.display(), "ignoring unsupported share entry"),
        }
    }

    directories.retain(|dir| {
        !files
            .iter()
            .any(|file| file.source != dir.source && file.source.starts_with(&dir.source))
    });

    for copy in directories.iter().chain(files.iter()) {
        counts.record(copy.kind);
    }

    directories.extend(files);
    Ok(directories)
}

/// Performs the copies planned by [`plan_share_copies`]. Returns how many
/// files were written.
pub async fn copy_from_share(copies: Vec<ShareCopy>) -> Result<u64, AppError> {
    let copied = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let mut copied: u64 = 0;
        for copy in &copies {
            if copy.kind == MediaKind::Directory {
                copied = copied.saturating_add(copy_dir_recursive(&copy.source, &copy.target)?);
            } else {
                copy_file_into(&copy.source, &copy.target)?;
                copied = copied.saturating_add(1);
            }
        }
        Ok(copied)
    })
    .await??;
    Ok(copied)
}

/// Plans downloads of `urls` into `upload_dir`, classifying each by the file
/// name it will be saved under. Unsupported URLs are skipped.
pub fn plan_remote_files(
    upload_dir: &Path,
    urls: &[String],
    counts: &mut FileCounts,
) -> Result<Vec<RemoteDownload>, AppError> {
    let mut downloads = Vec::with_capacity(urls.len());
    for raw in urls {
        let url = Url::parse(raw)
            .map_err(|err| AppError::Validation(format!("invalid remote file URL {raw}: {err}")))?;
        let target = upload_dir.join(file_name_for(&url)?);
        let kind = classify_name(&target);
        if !matches!(kind, MediaKind::Image | MediaKind::Video | MediaKind::Archive) {
            debug!(%url, "ignoring unsupported remote file");
            continue;
        }
        if downloads.iter().any(|d: &RemoteDownload| d.target == target) {
            return Err(AppError::Validation(format!(
                "more than one remote file would be saved as {}",
                target.display()
            )));
        }
        counts.record(kind);
        downloads.push(RemoteDownload { url, target });
    }
    Ok(downloads)
}

/// Performs the downloads planned by [`plan_remote_files`].
pub async fn fetch_remote_files(
    downloads: &[RemoteDownload],
    fetcher: &dyn RemoteFetcher,
) -> Result<u64, AppError> {
    let mut bytes: u64 = 0;
    for download in downloads {
        bytes = bytes.saturating_add(fetcher.fetch(&download.url, &download.target).await?);
    }
    Ok(bytes)
}
