//! Part-file operations: creation, preallocation, concurrent offset writes,
//! validation, and the final atomic rename.

mod builder;
mod writer;

pub use builder::PartFileBuilder;
pub use writer::PartWriter;

use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, FetchError};
use crate::planner::PART_SUFFIX;

/// Path of the in-progress download for `output` (`<output>.part`).
pub fn part_path(output: &Path) -> PathBuf {
    let mut s = output.as_os_str().to_os_string();
    s.push(PART_SUFFIX);
    PathBuf::from(s)
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FetchError::from_io(
                    ErrorKind::DownloadFailed,
                    &e,
                    format!("failed to create directory {}", parent.display()),
                )
            })?;
        }
    }
    Ok(())
}

pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

pub fn file_size(path: &Path) -> Result<u64, FetchError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        FetchError::from_io(
            ErrorKind::DownloadFailed,
            &e,
            format!("failed to stat {}", path.display()),
        )
    })?;
    Ok(meta.len())
}

/// Check that an existing part file can back a resumed download: it must be
/// present, readable and writable, and no larger than the expected size.
pub fn validate_partial_file(part: &Path, expected_size: u64) -> Result<(), FetchError> {
    let meta = std::fs::metadata(part).map_err(|e| {
        FetchError::from_io(
            ErrorKind::PartialFileInvalid,
            &e,
            format!("cannot stat part file {}", part.display()),
        )
    })?;
    if meta.len() > expected_size {
        return Err(FetchError::new(
            ErrorKind::PartialFileInvalid,
            0,
            format!(
                "part file is {} bytes but only {} were expected",
                meta.len(),
                expected_size
            ),
        )
        .with_context("part_path", part.display().to_string()));
    }
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(part)
        .map_err(|e| {
            FetchError::from_io(
                ErrorKind::PartialFileInvalid,
                &e,
                format!("cannot open part file {}", part.display()),
            )
        })?;
    drop(file);
    Ok(())
}
