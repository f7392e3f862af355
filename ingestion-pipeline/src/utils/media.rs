use std::{
    cmp::Ordering,
    fmt,
    path::{Path, PathBuf},
};

use mime_guess::from_path;

/// Archive MIME types the unpacker understands.
const ARCHIVE_MIME_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/x-rar-compressed",
    "application/vnd.rar",
    "application/x-tar",
    "application/x-7z-compressed",
    "application/x-cpio",
    "application/gzip",
    "application/x-gzip",
    "application/x-bzip2",
];

/// Compression suffixes treated as archives regardless of the inner type.
const ARCHIVE_ENCODINGS: &[&str] = &["gz", "tgz", "bz2", "tbz", "tbz2"];

/// Image types recognised by extension that the decoder cannot rasterise.
const UNSUPPORTED_IMAGE_TYPES: &[&str] = &["image/svg+xml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Archive,
    Directory,
    Empty,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Archive => "archive",
            MediaKind::Directory => "directory",
            MediaKind::Empty => "empty",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a path by its file name alone. Never returns `Directory`.
pub fn classify_name(path: &Path) -> MediaKind {
    let encoded = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ARCHIVE_ENCODINGS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        });

    let Some(mime) = from_path(path).first() else {
        return if encoded {
            MediaKind::Archive
        } else {
            MediaKind::Empty
        };
    };

    let essence = mime.essence_str();
    if mime.type_() == mime::VIDEO {
        MediaKind::Video
    } else if encoded || ARCHIVE_MIME_TYPES.contains(&essence) {
        MediaKind::Archive
    } else if mime.type_() == mime::IMAGE && !UNSUPPORTED_IMAGE_TYPES.contains(&essence) {
        MediaKind::Image
    } else {
        MediaKind::Empty
    }
}

/// Classifies a filesystem entry: directories first, then by file name.
pub fn classify(path: &Path) -> MediaKind {
    if path.is_dir() {
        MediaKind::Directory
    } else {
        classify_name(path)
    }
}

/// Frame ordering of source files: plain byte-wise comparison of the full
/// path, independent of locale and of the order the filesystem lists entries.
pub fn frame_order(a: &Path, b: &Path) -> Ordering {
    a.as_os_str()
        .as_encoded_bytes()
        .cmp(b.as_os_str().as_encoded_bytes())
}

pub fn sort_in_frame_order(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| frame_order(a, b));
}
