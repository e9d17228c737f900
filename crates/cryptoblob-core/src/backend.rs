//! Storage and lock backend traits consumed by an orchestrator, plus a
//! local-file reference implementation of each. Neither is part of the
//! core's own contract — `CryptoBlob` never touches these types — but a
//! CLI needs something real to point at.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use uuid::Uuid;

use crate::error::{CryptoBlobError, Result};

/// A mutation applied to a storage object's current bytes (or `None` if it
/// does not yet exist). Returning the same bytes back is a no-op; returning
/// `None` deletes the object.
pub type StorageModifier<'a> = dyn FnOnce(Option<Vec<u8>>) -> Option<Vec<u8>> + 'a;

/// A pluggable sink that stores, loads, and atomically mutates an opaque
/// byte string under a string locator.
pub trait Storage {
    /// Reads the blob at `loc`. A missing object surfaces as `BackendError`.
    fn load(&self, loc: &str) -> Result<Vec<u8>>;

    /// Reads the current bytes (or `None`), invokes `modifier`, and applies
    /// the result: no-op if unchanged, delete if `None`, atomic replace
    /// otherwise.
    fn modify(&self, loc: &str, modifier: Box<StorageModifier<'_>>) -> Result<()>;
}

/// A pluggable named advisory lock with an acquisition timeout.
pub trait Lock {
    type Handle;

    /// Acquires the lock named by `loc` within `timeout`, failing with
    /// `BackendError` on timeout.
    fn make_lock(&self, loc: &str, timeout: Duration) -> Result<Self::Handle>;
}

/// Local-filesystem storage backend using create-temp-then-rename for
/// atomic replacement, matching the original project's `atomicwrites`-based
/// file backend.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStorageBackend;

impl Storage for LocalFileStorageBackend {
    fn load(&self, loc: &str) -> Result<Vec<u8>> {
        fs::read(loc).map_err(|e| CryptoBlobError::BackendError(format!("{loc}: {e}")))
    }

    fn modify(&self, loc: &str, modifier: Box<StorageModifier<'_>>) -> Result<()> {
        let path = Path::new(loc);
        let current = if path.exists() {
            Some(fs::read(path).map_err(|e| CryptoBlobError::BackendError(e.to_string()))?)
        } else {
            None
        };

        let new_data = modifier(current.clone());

        if new_data == current {
            return Ok(());
        }

        match new_data {
            None => fs::remove_file(path)
                .map_err(|e| CryptoBlobError::BackendError(format!("{loc}: {e}"))),
            Some(bytes) => write_atomic(path, &bytes),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staging: PathBuf = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    fs::write(&staging, bytes)
        .map_err(|e| CryptoBlobError::BackendError(format!("writing staging file: {e}")))?;
    fs::rename(&staging, path)
        .map_err(|e| CryptoBlobError::BackendError(format!("replacing {path:?}: {e}")))?;
    Ok(())
}

/// An acquired local advisory lock. Released on drop.
pub struct LocalLockHandle {
    file: fs::File,
}

impl Drop for LocalLockHandle {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Local-filesystem advisory lock backend. Polls an exclusive `flock` on a
/// `<loc>.lock` sidecar file until acquired or `timeout` elapses.
#[derive(Debug, Clone, Default)]
pub struct LocalFileLockBackend;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl Lock for LocalFileLockBackend {
    type Handle = LocalLockHandle;

    fn make_lock(&self, loc: &str, timeout: Duration) -> Result<Self::Handle> {
        let lock_path = format!("{loc}.lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CryptoBlobError::BackendError(format!("{lock_path}: {e}")))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LocalLockHandle { file }),
                Err(_) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Err(_) => {
                    return Err(CryptoBlobError::BackendError(format!(
                        "timed out acquiring lock {lock_path}"
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_object_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFileStorageBackend;
        let err = backend
            .load(dir.path().join("missing").to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, CryptoBlobError::BackendError(_)));
    }

    #[test]
    fn modify_creates_then_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let loc = dir.path().join("blob").to_str().unwrap().to_string();
        let backend = LocalFileStorageBackend;

        backend
            .modify(&loc, Box::new(|_old| Some(b"v1".to_vec())))
            .unwrap();
        assert_eq!(backend.load(&loc).unwrap(), b"v1");

        backend
            .modify(&loc, Box::new(|old| {
                assert_eq!(old, Some(b"v1".to_vec()));
                Some(b"v2".to_vec())
            }))
            .unwrap();
        assert_eq!(backend.load(&loc).unwrap(), b"v2");
    }

    #[test]
    fn modify_with_none_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let loc = dir.path().join("blob").to_str().unwrap().to_string();
        let backend = LocalFileStorageBackend;
        backend
            .modify(&loc, Box::new(|_| Some(b"v1".to_vec())))
            .unwrap();
        backend.modify(&loc, Box::new(|_| None)).unwrap();
        assert!(backend.load(&loc).is_err());
    }

    #[test]
    fn lock_can_be_reacquired_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let loc = dir.path().join("blob").to_str().unwrap().to_string();
        let backend = LocalFileLockBackend;
        {
            let _guard = backend.make_lock(&loc, Duration::from_millis(100)).unwrap();
        }
        let _guard2 = backend.make_lock(&loc, Duration::from_millis(100)).unwrap();
    }
}
