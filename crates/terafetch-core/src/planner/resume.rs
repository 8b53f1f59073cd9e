//! Resume metadata persistence: the `<output>.terafetch.json` sidecar.
//!
//! The sidecar's field names and layout are an external contract; new fields
//! may be added but existing ones must keep their meaning. The coordinator is
//! the only writer, so each read-modify-write here sees a consistent record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{ErrorKind, FetchError};
use crate::resolver::FileMetadata;

use super::{SegmentInfo, MAX_SEGMENT_RETRIES, RESUME_MAX_AGE, RESUME_METADATA_SUFFIX};

/// Persistent snapshot of a download in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeMetadata {
    pub file_metadata: FileMetadata,
    pub segments: Vec<SegmentInfo>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Sidecar path for `output` (`<output>.terafetch.json`).
pub fn metadata_path(output: &Path) -> PathBuf {
    let mut s = output.as_os_str().to_os_string();
    s.push(RESUME_METADATA_SUFFIX);
    PathBuf::from(s)
}

/// Write a fresh resume record for `output`.
pub fn save_resume_metadata(
    output: &Path,
    meta: &FileMetadata,
    segments: &[SegmentInfo],
) -> Result<(), FetchError> {
    let now = Utc::now();
    let record = ResumeMetadata {
        file_metadata: meta.clone(),
        segments: segments.to_vec(),
        created_at: now,
        last_update: now,
    };
    write_record(output, &record)
}

fn write_record(output: &Path, record: &ResumeMetadata) -> Result<(), FetchError> {
    let path = metadata_path(output);
    let json = serde_json::to_string_pretty(record).map_err(|e| {
        FetchError::new(
            ErrorKind::ResumeDataCorrupted,
            0,
            format!("failed to encode resume metadata: {}", e),
        )
    })?;
    std::fs::write(&path, json).map_err(|e| {
        FetchError::from_io(
            ErrorKind::DownloadFailed,
            &e,
            format!("failed to write {}", path.display()),
        )
    })
}

/// Load the resume record for `output`. A missing or unparseable sidecar is
/// `ResumeDataCorrupted`; callers decide whether to recover or give up.
pub fn load_resume_metadata(output: &Path) -> Result<ResumeMetadata, FetchError> {
    let path = metadata_path(output);
    let data = std::fs::read_to_string(&path).map_err(|e| {
        FetchError::new(
            ErrorKind::ResumeDataCorrupted,
            0,
            format!("cannot read resume metadata {}: {}", path.display(), e),
        )
        .with_context("metadata_path", path.display().to_string())
    })?;
    serde_json::from_str(&data).map_err(|e| {
        FetchError::new(
            ErrorKind::ResumeDataCorrupted,
            0,
            format!("resume metadata is not valid JSON: {}", e),
        )
        .with_context("metadata_path", path.display().to_string())
    })
}

/// Mark one segment's completion state and persist.
pub fn update_segment_progress(
    output: &Path,
    segment_index: usize,
    completed: bool,
) -> Result<(), FetchError> {
    let mut record = load_resume_metadata(output)?;
    let segment = record.segments.get_mut(segment_index).ok_or_else(|| {
        FetchError::new(
            ErrorKind::ResumeDataCorrupted,
            0,
            format!("segment index {} out of range", segment_index),
        )
    })?;
    segment.completed = completed;
    record.last_update = Utc::now();
    write_record(output, &record)
}

/// Bump one segment's retry counter and persist. Returns the new count.
pub fn increment_segment_retries(output: &Path, segment_index: usize) -> Result<u32, FetchError> {
    let mut record = load_resume_metadata(output)?;
    let segment = record.segments.get_mut(segment_index).ok_or_else(|| {
        FetchError::new(
            ErrorKind::ResumeDataCorrupted,
            0,
            format!("segment index {} out of range", segment_index),
        )
    })?;
    segment.retries += 1;
    let retries = segment.retries;
    record.last_update = Utc::now();
    write_record(output, &record)?;
    Ok(retries)
}

/// Remove the sidecar after a finished download. Missing file is fine.
pub fn cleanup_resume_metadata(output: &Path) -> Result<(), FetchError> {
    let path = metadata_path(output);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FetchError::from_io(
            ErrorKind::DownloadFailed,
            &e,
            format!("failed to remove {}", path.display()),
        )),
    }
}

/// Look for a resumable download at `output`.
///
/// Returns the record only when both the sidecar and the part file exist and
/// the part file is no larger than the expected size. A sidecar without a
/// part file is stale and silently removed. An oversized part file (or an
/// unreadable sidecar) removes both and reports the cleanup as an error so
/// the caller can log it before starting fresh.
pub fn detect_resumable(output: &Path) -> Result<Option<ResumeMetadata>, FetchError> {
    let meta_file = metadata_path(output);
    let part_file = crate::storage::part_path(output);

    if !crate::storage::file_exists(&meta_file) {
        return Ok(None);
    }
    if !crate::storage::file_exists(&part_file) {
        let _ = std::fs::remove_file(&meta_file);
        return Ok(None);
    }

    let record = match load_resume_metadata(output) {
        Ok(r) => r,
        Err(e) => {
            let _ = std::fs::remove_file(&meta_file);
            let _ = std::fs::remove_file(&part_file);
            return Err(e.with_suggestion("Stale resume state was removed; rerun to start fresh"));
        }
    };

    let expected = record.file_metadata.size;
    let part_size = crate::storage::file_size(&part_file)?;
    if part_size > expected {
        let _ = std::fs::remove_file(&meta_file);
        let _ = std::fs::remove_file(&part_file);
        return Err(FetchError::new(
            ErrorKind::PartialFileInvalid,
            0,
            format!(
                "part file is {} bytes, larger than the expected {}; removed both",
                part_size, expected
            ),
        ));
    }

    Ok(Some(record))
}

/// Check a resume record against freshly resolved facts. A changed size is
/// fatal; a changed filename only warrants a warning; a record older than
/// `RESUME_MAX_AGE` is discarded.
pub fn validate_resume_compatibility(
    resume: &ResumeMetadata,
    current: &FileMetadata,
) -> Result<(), FetchError> {
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
        tracing::warn!(
            old = %resume.file_metadata.filename,
            new = %current.filename,
            "filename changed since resume metadata was written"
        );
    }
    let age = Utc::now().signed_duration_since(resume.last_update);
    if age.to_std().unwrap_or_default() > RESUME_MAX_AGE {
        return Err(FetchError::new(
            ErrorKind::ResumeIncompatible,
            0,
            format!("resume data is too old (last update {})", resume.last_update),
        ));
    }
    Ok(())
}

/// Record a network interruption on a segment: bump its retry counter, fail
/// once the budget is spent, otherwise back off quadratically (capped 30 s,
/// scaled by `unit` which is one second in production).
pub fn recover_from_network_interruption(
    output: &Path,
    segment_index: usize,
    cancel: &CancelToken,
    unit: Duration,
) -> Result<(), FetchError> {
    let retries = increment_segment_retries(output, segment_index)?;
    if retries >= MAX_SEGMENT_RETRIES {
        return Err(FetchError::new(
            ErrorKind::DownloadFailed,
            0,
            format!(
                "segment {} exceeded maximum retries ({})",
                segment_index, MAX_SEGMENT_RETRIES
            ),
        )
        .with_context("segment", segment_index.to_string()));
    }
    let backoff = unit
        .saturating_mul(retries * retries)
        .min(Duration::from_secs(30));
    tracing::warn!(
        segment = segment_index,
        retry = retries,
        max = MAX_SEGMENT_RETRIES,
        ?backoff,
        "network interruption, backing off"
    );
    if !cancel.sleep(backoff) {
        return Err(FetchError::cancelled());
    }
    Ok(())
}
