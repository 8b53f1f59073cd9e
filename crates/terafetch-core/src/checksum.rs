//! File checksums for the optional post-download hook.
//!
//! The engine itself verifies size only; content verification is up to the
//! caller, who can wire `sha256_path` into a finalize hook.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ErrorKind, FetchError};

const BUF_SIZE: usize = 64 * 1024;

/// SHA-256 of a file as lowercase hex. Reads in chunks so memory stays
/// bounded for large downloads.
pub fn sha256_path(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path).map_err(|e| {
        FetchError::from_io(
            ErrorKind::CorruptedFile,
            &e,
            format!("cannot open {} for checksum", path.display()),
        )
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| {
            FetchError::from_io(
                ErrorKind::CorruptedFile,
                &e,
                format!("read failed while hashing {}", path.display()),
            )
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_digest() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            sha256_path(f.path()).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn known_content_digest() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        assert_eq!(
            sha256_path(f.path()).unwrap(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = sha256_path(Path::new("/nonexistent/x.bin")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptedFile);
    }
}
