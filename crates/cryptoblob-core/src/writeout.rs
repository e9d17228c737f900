//! Directory reconstruction shared by master and tenant unpacking.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{CryptoBlobError, Result};
use crate::model::FileItem;
use crate::partitioner::FilesPartitions;

/// Writes every file in `file_map` under `dest/prefix/relpath`, with bodies
/// sourced from decrypted `partitions`.
///
/// `created_dirs` lets callers share the already-created-directory set
/// across multiple calls (e.g. master writeout across several principals),
/// avoiding repeated `mkdir` syscalls for directories seen before.
pub fn write_files(
    dest: &Path,
    prefix: &str,
    file_map: &[(String, FileItem)],
    partitions: &FilesPartitions,
    created_dirs: &mut HashSet<PathBuf>,
) -> Result<()> {
    let prefix_path = if prefix.is_empty() {
        dest.to_path_buf()
    } else {
        dest.join(prefix)
    };

    for (relpath, item) in file_map {
        let final_path = prefix_path.join(relpath);
        if let Some(parent) = final_path.parent() {
            ensure_dir(parent, created_dirs)?;
        }

        let body =
            &partitions.partitions[item.partition_id as usize].bodies[item.body_id as usize];

        if item.is_symlink() {
            write_symlink(dest, prefix, body, item, &final_path)?;
        } else {
            fs::write(&final_path, body).map_err(CryptoBlobError::Io)?;
            let mtime = FileTime::from_unix_time(
                item.mtime_ns / 1_000_000_000,
                (item.mtime_ns % 1_000_000_000) as u32,
            );
            filetime::set_file_times(&final_path, mtime, mtime).map_err(CryptoBlobError::Io)?;
        }
    }
    Ok(())
}

fn ensure_dir(dir: &Path, created_dirs: &mut HashSet<PathBuf>) -> Result<()> {
    if created_dirs.contains(dir) {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(CryptoBlobError::Io)?;
    let mut cursor = dir.to_path_buf();
    loop {
        if !created_dirs.insert(cursor.clone()) {
            break;
        }
        match cursor.parent() {
            Some(p) => cursor = p.to_path_buf(),
            None => break,
        }
    }
    Ok(())
}

/// `SYMLINK_ABS` targets are rewritten relative to `dest`/`prefix`; plain
/// relative targets are written back out verbatim. Preserving the link's
/// own mtime is best-effort and skipped where the platform offers no call
/// for it.
#[cfg(unix)]
fn write_symlink(
    dest: &Path,
    prefix: &str,
    body: &[u8],
    item: &FileItem,
    final_path: &Path,
) -> Result<()> {
    use std::os::unix::fs::symlink;

    let target_string = String::from_utf8(body.to_vec())
        .map_err(|_| CryptoBlobError::SchemaError("symlink target is not valid UTF-8".into()))?;

    let link_target: PathBuf = if item.is_symlink_abs() {
        if prefix.is_empty() {
            dest.join(&target_string)
        } else {
            dest.join(prefix).join(&target_string)
        }
    } else {
        PathBuf::from(&target_string)
    };

    if final_path.symlink_metadata().is_ok() {
        fs::remove_file(final_path).map_err(CryptoBlobError::Io)?;
    }
    symlink(&link_target, final_path).map_err(CryptoBlobError::Io)?;

    let mtime = FileTime::from_unix_time(
        item.mtime_ns / 1_000_000_000,
        (item.mtime_ns % 1_000_000_000) as u32,
    );
    let _ = filetime::set_symlink_file_times(final_path, mtime, mtime);
    Ok(())
}

#[cfg(not(unix))]
fn write_symlink(
    _dest: &Path,
    _prefix: &str,
    _body: &[u8],
    _item: &FileItem,
    _final_path: &Path,
) -> Result<()> {
    Err(CryptoBlobError::UnsupportedNode(
        "symbolic links are not supported on this platform".to_string(),
    ))
}
