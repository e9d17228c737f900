//! Directory walk producing a flat, content-deduplicated file inventory.

use std::collections::HashMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{CryptoBlobError, Result};
use crate::model::{FileItem, FLAG_SYMLINK, FLAG_SYMLINK_ABS};

/// A file entry plus a reference to its deduplicated body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedItem {
    pub mtime_ns: i64,
    pub flags: i32,
    pub body_id: i32,
}

/// The collector's output: every file's metadata and the deduplicated body
/// table it references into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesCollection {
    pub bodies: Vec<Vec<u8>>,
    /// source-relative path (forward-slash separated) -> item
    pub files: Vec<(String, CollectedItem)>,
}

/// Walks `root` recursively, producing a [`FilesCollection`].
///
/// Directories are descended without producing output. Regular files
/// contribute their bytes and mtime. Symbolic links capture their own mtime
/// and (possibly rewritten) target string; an absolute target is resolved
/// against `root` and must stay within it. Anything else fails with
/// `UNSUPPORTED_NODE`.
pub fn collect(root: &Path) -> Result<FilesCollection> {
    let mut bodies: Vec<Vec<u8>> = Vec::new();
    let mut body_index: HashMap<Vec<u8>, i32> = HashMap::new();
    let mut files: Vec<(String, CollectedItem)> = Vec::new();

    let mut intern = |body: Vec<u8>| -> i32 {
        if let Some(&id) = body_index.get(&body) {
            return id;
        }
        let id = bodies.len() as i32;
        body_index.insert(body.clone(), id);
        bodies.push(body);
        id
    };

    let root_canonical = root
        .canonicalize()
        .map_err(CryptoBlobError::Io)?;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            CryptoBlobError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;

        if entry.path() == root {
            continue;
        }

        let relpath = relative_slash_path(root, entry.path())?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }

        let metadata = fs::symlink_metadata(entry.path()).map_err(CryptoBlobError::Io)?;
        let mtime_ns = mtime_ns_of(&metadata);

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(CryptoBlobError::Io)?;
            let (normalized, flags) = normalize_symlink_target(root, &root_canonical, entry.path(), &target)?;
            let body_id = intern(normalized.into_bytes());
            files.push((
                relpath,
                CollectedItem {
                    mtime_ns,
                    flags,
                    body_id,
                },
            ));
        } else if file_type.is_file() {
            let contents = fs::read(entry.path()).map_err(CryptoBlobError::Io)?;
            let body_id = intern(contents);
            files.push((
                relpath,
                CollectedItem {
                    mtime_ns,
                    flags: 0,
                    body_id,
                },
            ));
        } else {
            return Err(CryptoBlobError::UnsupportedNode(relpath));
        }
    }

    Ok(FilesCollection { bodies, files })
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        CryptoBlobError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "walked entry outside root",
        ))
    })?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str().unwrap_or_default())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn mtime_ns_of(metadata: &fs::Metadata) -> i64 {
    metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec()
}

#[cfg(not(unix))]
fn mtime_ns_of(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Resolves an absolute symlink target relative to `root` and fails with
/// `OUT_OF_TREE` if it escapes. Relative targets are passed through as-is;
/// their traversal legality is checked later by the partitioner, which knows
/// the principal root.
fn normalize_symlink_target(
    root: &Path,
    root_canonical: &Path,
    link_path: &Path,
    target: &Path,
) -> Result<(String, i32)> {
    if target.is_absolute() {
        let link_dir = link_path.parent().unwrap_or(root);
        let absolute_target = link_dir.join(target);
        let lexical = lexically_normalize(&absolute_target);
        let stripped = lexical.strip_prefix(root_canonical).or_else(|_| {
            lexical
                .strip_prefix(root)
                .map_err(|_| CryptoBlobError::OutOfTree(path_to_slash(target)))
        });
        let stripped = match stripped {
            Ok(p) => p,
            Err(_) => {
                return Err(CryptoBlobError::OutOfTree(path_to_slash(target)));
            }
        };
        Ok((path_to_slash(stripped), FLAG_SYMLINK | FLAG_SYMLINK_ABS))
    } else {
        Ok((path_to_slash(target), FLAG_SYMLINK))
    }
}

fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn path_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_str().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("/")
}

impl FileItem {
    pub fn from_collected(item: &CollectedItem, partition_id: i32) -> Self {
        Self {
            mtime_ns: item.mtime_ns,
            flags: item.flags,
            partition_id,
            body_id: item.body_id,
        }
    }
}
