//! Concurrent offset writer for the part file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ErrorKind, FetchError};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Writer over the shared part-file descriptor. Clones share one open file;
/// `write_at` is pwrite-style, so workers writing disjoint ranges never need
/// coordination.
#[derive(Clone, Debug)]
pub struct PartWriter {
    file: Arc<File>,
    part_path: PathBuf,
}

impl PartWriter {
    pub(crate) fn from_file_and_path(file: File, part_path: PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            part_path,
        }
    }

    /// Open an already-preallocated part file for a resumed download.
    pub fn open_existing(part_path: &Path) -> Result<Self, FetchError> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(part_path)
            .map_err(|e| {
                FetchError::from_io(
                    ErrorKind::PartialFileInvalid,
                    &e,
                    format!("failed to open part file {}", part_path.display()),
                )
            })?;
        Ok(Self {
            file: Arc::new(file),
            part_path: part_path.to_path_buf(),
        })
    }

    /// Write `data` at the absolute `offset` without moving any cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), FetchError> {
        self.file.write_all_at(data, offset).map_err(|e| {
            FetchError::from_io(
                ErrorKind::DownloadFailed,
                &e,
                format!("write of {} bytes at offset {} failed", data.len(), offset),
            )
        })
    }

    /// Seek-and-write fallback for non-Unix targets. Each clone re-opens the
    /// file so concurrent writers do not race on a shared cursor.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), FetchError> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = File::options()
            .write(true)
            .open(&self.part_path)
            .map_err(|e| FetchError::from_io(ErrorKind::DownloadFailed, &e, "reopen part file"))?;
        f.seek(SeekFrom::Start(offset))
            .and_then(|_| f.write_all(data))
            .map_err(|e| {
                FetchError::from_io(
                    ErrorKind::DownloadFailed,
                    &e,
                    format!("write of {} bytes at offset {} failed", data.len(), offset),
                )
            })
    }

    /// Flush file data to disk. Call before `finalize` for durability.
    pub fn sync(&self) -> Result<(), FetchError> {
        self.file.sync_all().map_err(|e| {
            FetchError::from_io(ErrorKind::DownloadFailed, &e, "failed to sync part file")
        })
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Atomically rename the part file to `final_path`. Consumes the writer;
    /// the rename is a single syscall and requires both paths to live on the
    /// same filesystem.
    pub fn finalize(self, final_path: &Path) -> Result<(), FetchError> {
        let part_path = self.part_path.clone();
        drop(self.file);
        std::fs::rename(&part_path, final_path).map_err(|e| {
            FetchError::from_io(
                ErrorKind::DownloadFailed,
                &e,
                format!(
                    "failed to rename {} to {}",
                    part_path.display(),
                    final_path.display()
                ),
            )
        })
    }
}
