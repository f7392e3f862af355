use common::{error::AppError, storage::types::task::TaskMode};

use super::media::MediaKind;

/// How many entries of each media kind an upload contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub image: usize,
    pub directory: usize,
    pub video: usize,
    pub archive: usize,
}

impl FileCounts {
    /// Counts `kind`; returns `false` for kinds that are never counted.
    pub fn record(&mut self, kind: MediaKind) -> bool {
        let slot = match kind {
            MediaKind::Image => &mut self.image,
            MediaKind::Directory => &mut self.directory,
            MediaKind::Video => &mut self.video,
            MediaKind::Archive => &mut self.archive,
            MediaKind::Empty => return false,
        };
        *slot = slot.saturating_add(1);
        true
    }

    pub fn total(&self) -> usize {
        self.image
            .saturating_add(self.directory)
            .saturating_add(self.video)
            .saturating_add(self.archive)
    }

    /// Interpolation iff the upload is a single video.
    pub fn mode(&self) -> TaskMode {
        if self.video > 0 && self.image == 0 && self.directory == 0 && self.archive == 0 {
            TaskMode::Interpolation
        } else {
            TaskMode::Annotation
        }
    }
}

/// Legal upload combinations:
/// * any number of images and directories, no video, no archive
/// * exactly one video and nothing else
/// * exactly one archive and nothing else
pub fn validate(counts: &FileCounts) -> bool {
    let stills = counts.image > 0 || counts.directory > 0;
    if stills && (counts.video > 0 || counts.archive > 0) {
        return false;
    }
    if counts.video > 1 || (counts.video > 0 && counts.archive > 0) {
        return false;
    }
    counts.archive <= 1
}

pub fn ensure_valid(counts: &FileCounts) -> Result<(), AppError> {
    if counts.total() == 0 {
        return Err(AppError::Validation(
            "No media files found among the uploaded data".into(),
        ));
    }

    if !validate(counts) {
        return Err(AppError::Validation(format!(
            "Only one archive, one video or many images can be uploaded simultaneously. \
             {} image(s), {} dir(s), {} video(s), {} archive(s) found",
            counts.image, counts.directory, counts.video, counts.archive
        )));
    }

    Ok(())
}
