//! Creation and preallocation of the part file.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, FetchError};

use super::writer::PartWriter;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Creates the `<output>.part` file at its final size before any worker
/// writes into it. Once built, every offset in `[0, size)` is writable.
pub struct PartFileBuilder {
    file: File,
    part_path: PathBuf,
}

impl PartFileBuilder {
    /// Create (or truncate) the part file at `part_path`.
    pub fn create(part_path: &Path) -> Result<Self, FetchError> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(part_path)
            .map_err(|e| {
                FetchError::from_io(
                    ErrorKind::DownloadFailed,
                    &e,
                    format!("failed to create part file {}", part_path.display()),
                )
            })?;
        Ok(Self {
            file,
            part_path: part_path.to_path_buf(),
        })
    }

    /// Grow the file to exactly `size` bytes. On Unix, `posix_fallocate`
    /// reserves real blocks (and fails early when the disk is full); sparse
    /// `set_len` is the fallback. A size of 0 leaves an empty file.
    pub fn preallocate(&mut self, size: u64) -> Result<(), FetchError> {
        if size == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            if r == libc::ENOSPC {
                return Err(FetchError::new(
                    ErrorKind::DiskSpace,
                    0,
                    format!("not enough disk space for {} bytes", size),
                )
                .with_context("part_path", self.part_path.display().to_string()));
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size).map_err(|e| {
            FetchError::from_io(
                ErrorKind::DownloadFailed,
                &e,
                format!("failed to preallocate {}", self.part_path.display()),
            )
        })
    }

    /// Finish building; the returned writer can be cloned across workers.
    pub fn build(self) -> PartWriter {
        PartWriter::from_file_and_path(self.file, self.part_path)
    }
}
