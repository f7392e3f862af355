use common::{
    error::AppError,
    storage::types::task::{TaskMode, DEFAULT_INTERPOLATION_OVERLAP},
};

/// Inclusive range of frame indices covered by one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: u64,
    pub stop: u64,
}

impl FrameRange {
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }
}

/// Overlap used when the task leaves it unset: a few frames for tracking
/// continuity in interpolation tasks, none for annotation.
pub fn effective_overlap(mode: TaskMode, overlap: Option<u32>, segment_size: u32) -> u32 {
    if let Some(explicit) = overlap {
        return explicit;
    }

    let default = match mode {
        TaskMode::Interpolation => DEFAULT_INTERPOLATION_OVERLAP,
        TaskMode::Annotation => 0,
    };

    if segment_size > 0 {
        default.min(segment_size / 2)
    } else {
        default
    }
}

/// Splits `size` frames into segments of `segment_size` frames, consecutive
/// segments sharing `overlap` frames. The last segment ends at `size - 1` and
/// may be shorter. `segment_size == 0` means a single segment.
pub fn segment(size: u64, overlap: u32, segment_size: u32) -> Result<Vec<FrameRange>, AppError> {
    let Some(last) = size.checked_sub(1) else {
        return Ok(Vec::new());
    };

    let segment_size = u64::from(segment_size);
    if segment_size == 0 || segment_size >= size {
        return Ok(vec![FrameRange::new(0, last)]);
    }

    let overlap = u64::from(overlap);
    let Some(step) = segment_size.checked_sub(overlap).filter(|step| *step > 0) else {
        return Err(AppError::Validation(format!(
            "overlap ({overlap}) must be smaller than segment size ({segment_size})"
        )));
    };

    let mut segments = Vec::new();
    let mut start: u64 = 0;
    loop {
        let stop = start.saturating_add(segment_size - 1).min(last);
        segments.push(FrameRange::new(start, stop));
        if stop == last {
            break;
        }
        start = start.saturating_add(step);
    }

    Ok(segments)
}
