//! Classifies collected files into principals, validates symlinks against
//! their principal root, and groups bodies into visibility-set partitions.

use std::collections::{BTreeSet, HashMap};

use crate::collector::{CollectedItem, FilesCollection};
use crate::error::{CryptoBlobError, Result};
use crate::model::{FileItem, Partition, FLAG_SYMLINK, FLAG_SYMLINK_ABS};

/// The partitioner's output: the partition table, each principal's file
/// mapping, and the set of partition ids each principal's files touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesPartitions {
    pub partitions: Vec<Partition>,
    /// principal name (`""` for master) -> relpath -> item
    pub files: Vec<(String, Vec<(String, FileItem)>)>,
    /// principal name -> partition ids referenced by that principal
    pub used_partitions: Vec<(String, BTreeSet<i32>)>,
}

struct Classified {
    principal: String,
    relpath: String,
    item: CollectedItem,
}

/// Splits a collected path into `(principal, relpath)`. `master/<rest>`
/// yields principal `""`; `tenants/<name>/<rest>` yields principal `<name>`.
/// Anything else fails with `BAD_LAYOUT`.
fn classify_path(path: &str) -> Result<(String, String)> {
    if let Some(rest) = path.strip_prefix("master/") {
        return Ok(("".to_string(), rest.to_string()));
    }
    if let Some(rest) = path.strip_prefix("tenants/") {
        if let Some(slash) = rest.find('/') {
            let (name, tail) = rest.split_at(slash);
            return Ok((name.to_string(), tail[1..].to_string()));
        }
    }
    Err(CryptoBlobError::BadLayout(path.to_string()))
}

fn principal_prefix(principal: &str) -> String {
    if principal.is_empty() {
        "master".to_string()
    } else {
        format!("tenants/{principal}")
    }
}

/// Validates a relative symlink's traversal from `relpath`'s directory,
/// never climbing above the principal root. No filesystem access.
fn validate_relative_traversal(relpath: &str, target: &str) -> Result<()> {
    let mut stack: Vec<&str> = relpath
        .rsplit_once('/')
        .map(|(dir, _)| dir.split('/').filter(|c| !c.is_empty()).collect())
        .unwrap_or_default();

    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(CryptoBlobError::OutOfTree(format!(
                        "{relpath} -> {target}"
                    )));
                }
            }
            other => stack.push(other),
        }
    }
    Ok(())
}

/// Classifies, validates, and partitions a [`FilesCollection`].
pub fn partition(collection: &FilesCollection) -> Result<FilesPartitions> {
    let mut classified: Vec<Classified> = Vec::with_capacity(collection.files.len());
    for (path, item) in &collection.files {
        let (principal, relpath) = classify_path(path)?;
        classified.push(Classified {
            principal,
            relpath,
            item: item.clone(),
        });
    }

    let mut bodies: Vec<Vec<u8>> = collection.bodies.clone();
    let mut body_index: HashMap<Vec<u8>, i32> = bodies
        .iter()
        .enumerate()
        .map(|(i, b)| (b.clone(), i as i32))
        .collect();

    for entry in classified.iter_mut() {
        if entry.item.flags & FLAG_SYMLINK == 0 {
            continue;
        }
        let target_bytes = bodies[entry.item.body_id as usize].clone();
        let target = String::from_utf8(target_bytes).map_err(|_| {
            CryptoBlobError::SchemaError("symlink target is not valid UTF-8".to_string())
        })?;

        if entry.item.flags & FLAG_SYMLINK_ABS != 0 {
            let prefix = principal_prefix(&entry.principal);
            let full_prefix = format!("{prefix}/");
            let rewritten = if target == prefix {
                String::new()
            } else if let Some(rest) = target.strip_prefix(&full_prefix) {
                rest.to_string()
            } else {
                return Err(CryptoBlobError::OutOfTree(target));
            };
            let rewritten_bytes = rewritten.into_bytes();
            let new_id = if let Some(&id) = body_index.get(&rewritten_bytes) {
                id
            } else {
                let id = bodies.len() as i32;
                body_index.insert(rewritten_bytes.clone(), id);
                bodies.push(rewritten_bytes);
                id
            };
            entry.item.body_id = new_id;
        } else {
            validate_relative_traversal(&entry.relpath, &target)?;
        }
    }

    let mut referenced_by: HashMap<i32, BTreeSet<String>> = HashMap::new();
    for entry in &classified {
        referenced_by
            .entry(entry.item.body_id)
            .or_default()
            .insert(entry.principal.clone());
    }

    let mut partition_of_set: HashMap<BTreeSet<String>, i32> = HashMap::new();
    let mut partition_location: HashMap<i32, (i32, i32)> = HashMap::new();
    let mut partitions: Vec<Partition> = Vec::new();

    let mut body_ids: Vec<i32> = referenced_by.keys().copied().collect();
    body_ids.sort_unstable();

    for body_id in body_ids {
        let visibility = referenced_by.get(&body_id).cloned().unwrap_or_default();
        let partition_id = *partition_of_set.entry(visibility).or_insert_with(|| {
            partitions.push(Partition::default());
            (partitions.len() - 1) as i32
        });
        let local_index = partitions[partition_id as usize].bodies.len() as i32;
        partitions[partition_id as usize]
            .bodies
            .push(bodies[body_id as usize].clone());
        partition_location.insert(body_id, (partition_id, local_index));
    }

    let mut files: Vec<(String, Vec<(String, FileItem)>)> = Vec::new();
    let mut used_partitions: HashMap<String, BTreeSet<i32>> = HashMap::new();

    for entry in classified {
        let (partition_id, local_body_id) = partition_location[&entry.item.body_id];
        let file_item = FileItem {
            mtime_ns: entry.item.mtime_ns,
            flags: entry.item.flags,
            partition_id,
            body_id: local_body_id,
        };
        used_partitions
            .entry(entry.principal.clone())
            .or_default()
            .insert(partition_id);

        match files.iter_mut().find(|(p, _)| p == &entry.principal) {
            Some((_, map)) => map.push((entry.relpath, file_item)),
            None => files.push((entry.principal, vec![(entry.relpath, file_item)])),
        }
    }

    let mut used_partitions: Vec<(String, BTreeSet<i32>)> = used_partitions.into_iter().collect();
    used_partitions.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(FilesPartitions {
        partitions,
        files,
        used_partitions,
    })
}
