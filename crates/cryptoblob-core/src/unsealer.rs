//! Unpack direction: open the master or a tenant manifest and reconstruct
//! a directory tree from the partitions it references.

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::blob::CryptoBlob;
use crate::codec::decompress;
use crate::error::{CryptoBlobError, Result};
use crate::model::{MasterManifest, Partition, TenantKeys, TenantManifest};
use crate::partitioner::FilesPartitions;
use crate::primitives::{self, ReaderKey};
use crate::writeout;

/// Decrypts and decompresses `blob.xmaster` with `master_key`.
pub fn unseal_master(blob: &CryptoBlob, master_key: &[u8; 32]) -> Result<MasterManifest> {
    let compressed = primitives::decrypt(&blob.xmaster, master_key)?;
    let encoded = decompress(&compressed)?;
    MasterManifest::decode(&encoded)
}

/// Opens `blob.xtenants[key_id]` with the tenant's `reader_key`.
pub fn unseal_tenant(blob: &CryptoBlob, key_id: i32, reader_key: &ReaderKey) -> Result<TenantManifest> {
    let sealed = blob
        .tenant_bytes(key_id)
        .ok_or_else(|| CryptoBlobError::SchemaError(format!("no tenant manifest for key_id {key_id}")))?;
    let compressed = primitives::asymm_decrypt(sealed, reader_key)?;
    let encoded = decompress(&compressed)?;
    TenantManifest::decode(&encoded)
}

/// Returns every tenant identity recorded in the master manifest.
pub fn get_tenants_keys(manifest: &MasterManifest) -> &[TenantKeys] {
    &manifest.tenants_keys
}

fn decrypt_partitions(blob: &CryptoBlob, keys: &[Vec<u8>]) -> Result<FilesPartitions> {
    let mut partitions = Vec::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        if key.is_empty() {
            partitions.push(Partition::default());
            continue;
        }
        let key_arr: [u8; 32] = key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoBlobError::SchemaError("partition key must be 32 bytes".into()))?;
        let xpartition = blob
            .xpartitions
            .get(i)
            .ok_or_else(|| CryptoBlobError::SchemaError(format!("missing partition {i}")))?;
        let compressed = primitives::decrypt(xpartition, &key_arr)?;
        let encoded = decompress(&compressed)?;
        partitions.push(Partition::decode(&encoded)?);
    }
    Ok(FilesPartitions {
        partitions,
        files: Vec::new(),
        used_partitions: Vec::new(),
    })
}

/// Writes out every principal's files from the master manifest under
/// `dest/<prefix>/<relpath>`, where `<prefix>` is `master` for the empty
/// principal and `tenants/<name>` otherwise.
pub fn writeout_master(blob: &CryptoBlob, manifest: &MasterManifest, dest: &Path) -> Result<()> {
    let partitions = decrypt_partitions(blob, &manifest.partition_keys)?;
    let mut created_dirs = HashSet::new();

    for (principal, file_map) in &manifest.files {
        let prefix = if principal.is_empty() {
            "master".to_string()
        } else {
            format!("tenants/{principal}")
        };
        info!(principal = %principal, files = file_map.len(), "writing out principal");
        writeout::write_files(dest, &prefix, file_map, &partitions, &mut created_dirs)?;
    }
    Ok(())
}

/// Writes out a single tenant's files directly under `dest/<relpath>` (no
/// principal prefix), using only the partitions that tenant has a key for.
pub fn writeout_tenant(
    blob: &CryptoBlob,
    key_id: i32,
    reader_key: &ReaderKey,
    dest: &Path,
) -> Result<()> {
    let manifest = unseal_tenant(blob, key_id, reader_key)?;
    let partitions = decrypt_partitions(blob, &manifest.partition_keys)?;
    let mut created_dirs = HashSet::new();
    writeout::write_files(dest, "", &manifest.files, &partitions, &mut created_dirs)
}
