//! Content-addressed blob store.
//!
//! Documents are stored as opaque ciphertext under their file handle — the
//! hex SHA-256 of the plaintext. The handle is validated before it touches
//! the filesystem, so it can never escape the store directory. Writes go
//! through a temp file and a rename; a crash never leaves a half-written
//! blob under a valid handle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::RepError;

/// Hex characters in a SHA-256 handle.
const HANDLE_LEN: usize = 64;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(BlobStore { root })
    }

    fn path_for(&self, handle: &str) -> Result<PathBuf, RepError> {
        if handle.len() != HANDLE_LEN
            || !handle.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(RepError::BadRequest(format!("invalid file handle '{handle}'")));
        }
        Ok(self.root.join(handle))
    }

    /// Store a blob under its handle. Re-putting an existing handle is a
    /// no-op: content addressing makes the bytes identical by construction.
    pub fn put(&self, handle: &str, bytes: &[u8]) -> Result<(), RepError> {
        let path = self.path_for(handle)?;
        if path.exists() {
            return Ok(());
        }
        let tmp = self.root.join(format!(".tmp-{handle}"));
        fs::write(&tmp, bytes).map_err(|e| store_error("write", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| store_error("rename", &path, e))?;
        tracing::debug!(handle, size = bytes.len(), "blob stored");
        Ok(())
    }

    pub fn get(&self, handle: &str) -> Result<Vec<u8>, RepError> {
        let path = self.path_for(handle)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RepError::NotFound(format!("file '{handle}'")))
            }
            Err(e) => Err(store_error("read", &path, e)),
        }
    }

    pub fn exists(&self, handle: &str) -> Result<bool, RepError> {
        Ok(self.path_for(handle)?.exists())
    }
}

fn store_error(op: &str, path: &Path, e: io::Error) -> RepError {
    RepError::Internal(format!("blob store {op} {}: {e}", path.display()))
}
