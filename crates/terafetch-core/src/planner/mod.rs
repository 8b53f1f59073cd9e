//! Segment planning: partition `[0, size)` into worker-sized byte ranges.
//!
//! Segments always form a contiguous partition with no gaps or overlaps.
//! Every segment except possibly the last is at least `MIN_SEGMENT_SIZE`
//! when the file is that large at all.

mod resume;

pub use resume::{
    cleanup_resume_metadata, detect_resumable, increment_segment_retries, load_resume_metadata,
    metadata_path, recover_from_network_interruption, save_resume_metadata,
    update_segment_progress, validate_resume_compatibility, ResumeMetadata,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::DownloadConfig;
use crate::error::{ErrorKind, FetchError};
use crate::resolver::FileMetadata;

/// Smallest useful segment (1 MiB); below this a single worker wins.
pub const MIN_SEGMENT_SIZE: u64 = 1024 * 1024;
/// Hard cap on worker threads.
pub const MAX_THREADS: usize = 32;
/// Per-segment retry budget across the whole download.
pub const MAX_SEGMENT_RETRIES: u32 = 5;
/// Suffix of the resume sidecar next to the output file.
pub const RESUME_METADATA_SUFFIX: &str = ".terafetch.json";
/// Suffix of the in-progress download file.
pub const PART_SUFFIX: &str = ".part";
/// Resume records older than this are discarded.
pub const RESUME_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One contiguous byte range of the target file. Offsets are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub completed: bool,
    pub retries: u32,
}

#[allow(clippy::len_without_is_empty)] // inclusive end: a segment covers at least one byte
impl SegmentInfo {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Compute the segment plan for a download: resumed plans are taken verbatim
/// from the resume record, fresh plans are derived from size and threads.
pub fn plan(meta: &FileMetadata, config: &DownloadConfig) -> Result<Vec<SegmentInfo>, FetchError> {
    if let Some(ref resume) = config.resume_data {
        return plan_resume(resume, meta);
    }
    Ok(calculate_segments(meta.size, config.normalized_threads()))
}

/// Partition `size` bytes across up to `threads` segments.
///
/// Thread count is clamped to `1..=MAX_THREADS` and reduced so no segment
/// falls under `MIN_SEGMENT_SIZE`. A zero-size file yields no segments.
pub fn calculate_segments(size: u64, threads: usize) -> Vec<SegmentInfo> {
    if size == 0 {
        return Vec::new();
    }

    let mut count = threads.clamp(1, MAX_THREADS) as u64;
    if size < MIN_SEGMENT_SIZE {
        count = 1;
    } else if size / MIN_SEGMENT_SIZE < count {
        count = (size / MIN_SEGMENT_SIZE).max(1);
    }

    if count == 1 {
        return vec![SegmentInfo {
            index: 0,
            start: 0,
            end: size - 1,
            completed: false,
            retries: 0,
        }];
    }

    let base = size / count;
    (0..count)
        .map(|i| {
            let start = i * base;
            // Last segment absorbs the remainder.
            let end = if i == count - 1 { size - 1 } else { start + base - 1 };
            SegmentInfo {
                index: i as usize,
                start,
                end,
                completed: false,
                retries: 0,
            }
        })
        .collect()
}

/// Reuse segments from an earlier run. The stored file facts must match what
/// the resolver reports now, otherwise the partial bytes are meaningless.
pub fn plan_resume(
    resume: &ResumeMetadata,
    current: &FileMetadata,
) -> Result<Vec<SegmentInfo>, FetchError> {
    if resume.file_metadata.size != current.size {
        return Err(FetchError::new(
            ErrorKind::ResumeIncompatible,
            0,
            format!(
                "file size changed: resume={}, current={}",
                resume.file_metadata.size, current.size
            ),
        ));
    }
    if resume.file_metadata.filename != current.filename {
        return Err(FetchError::new(
            ErrorKind::ResumeIncompatible,
            0,
            format!(
                "filename changed: resume={:?}, current={:?}",
                resume.file_metadata.filename, current.filename
            ),
        ));
    }
    Ok(resume.segments.clone())
}

/// True when every segment of a non-empty plan is completed.
pub fn is_download_complete(segments: &[SegmentInfo]) -> bool {
    !segments.is_empty() && segments.iter().all(|s| s.completed)
}

/// Segments still needing a worker.
pub fn incomplete_segments(segments: &[SegmentInfo]) -> Vec<SegmentInfo> {
    segments.iter().filter(|s| !s.completed).copied().collect()
}

/// Completed share of the plan, in percent.
pub fn resume_progress_percent(segments: &[SegmentInfo]) -> f64 {
    let total: u64 = segments.iter().map(|s| s.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let done: u64 = segments.iter().filter(|s| s.completed).map(|s| s.len()).sum();
    done as f64 / total as f64 * 100.0
}
