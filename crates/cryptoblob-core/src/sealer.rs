//! Pack direction: collect, partition, issue keys, encrypt, and assemble
//! the outer container.

use std::path::Path;

use tracing::info;

use crate::blob::CryptoBlob;
use crate::codec::compress;
use crate::model::{MasterManifest, TenantKeys as WireTenantKeys, TenantManifest, CURRENT_VERSION};
use crate::primitives::{self, ReaderKey, WriterKey};
use crate::{collector, partitioner};
use crate::error::Result;

/// An already-known tenant identity, as tracked by the caller across
/// successive packs (see the "Forgetting a tenant" rule).
#[derive(Debug, Clone)]
pub struct KnownTenant {
    pub name: String,
    pub key_id: i32,
    pub writer_key: Vec<u8>,
    pub reader_key: Vec<u8>,
}

/// Packs `src` into a fresh [`CryptoBlob`].
///
/// `master_key` seals the master manifest. `previous_max_id` is the
/// blob-wide counter carried forward from whatever blob (if any) preceded
/// this pack — it only ever grows, independent of which tenants the caller
/// still remembers, so that a forgotten tenant's old `key_id` can never be
/// reissued to someone else. `existing_tenants_keys` carries forward
/// tenant identities from a prior pack; a tenant not present there is
/// treated as new and gets a fresh `key_id` and keypair.
pub fn pack(
    src: &Path,
    master_key: &[u8; 32],
    previous_max_id: i64,
    existing_tenants_keys: &[KnownTenant],
) -> Result<CryptoBlob> {
    info!(src = %src.display(), "collecting source tree");
    let collection = collector::collect(src)?;
    let partitions = partitioner::partition(&collection)?;
    info!(
        partitions = partitions.partitions.len(),
        files = collection.files.len(),
        "partitioned source tree"
    );

    let partition_keys: Vec<[u8; 32]> = (0..partitions.partitions.len())
        .map(|_| primitives::new_key())
        .collect();

    let mut max_id: i64 = previous_max_id.max(
        existing_tenants_keys
            .iter()
            .map(|t| t.key_id as i64)
            .max()
            .unwrap_or(0),
    );

    struct TenantIdentity {
        name: String,
        key_id: i32,
        writer_key: Vec<u8>,
        reader_key: Vec<u8>,
    }

    let mut identities: Vec<TenantIdentity> = Vec::new();
    for (principal, _) in &partitions.files {
        if principal.is_empty() {
            continue;
        }
        if let Some(existing) = existing_tenants_keys.iter().find(|t| &t.name == principal) {
            identities.push(TenantIdentity {
                name: existing.name.clone(),
                key_id: existing.key_id,
                writer_key: existing.writer_key.clone(),
                reader_key: existing.reader_key.clone(),
            });
        } else {
            max_id += 1;
            let (writer, reader) = primitives::asymm_new_keypair();
            identities.push(TenantIdentity {
                name: principal.clone(),
                key_id: max_id as i32,
                writer_key: writer.0.to_vec(),
                reader_key: reader.0.to_vec(),
            });
        }
    }
    identities.sort_by(|a, b| a.name.cmp(&b.name));

    let xpartitions: Vec<Vec<u8>> = partitions
        .partitions
        .iter()
        .zip(partition_keys.iter())
        .map(|(partition, key)| {
            let encoded = partition.encode();
            let compressed = compress(&encoded);
            primitives::encrypt(&compressed, key)
        })
        .collect();

    let tenants_keys: Vec<WireTenantKeys> = identities
        .iter()
        .map(|t| WireTenantKeys {
            tenant_name: t.name.clone(),
            key_id: t.key_id,
            writer_key: t.writer_key.clone(),
            reader_key: t.reader_key.clone(),
        })
        .collect();

    let master_manifest = MasterManifest {
        partition_keys: partition_keys.iter().map(|k| k.to_vec()).collect(),
        files: partitions.files.clone(),
        tenants_keys,
    };
    let xmaster = {
        let encoded = master_manifest.encode();
        let compressed = compress(&encoded);
        primitives::encrypt(&compressed, master_key)
    };

    let mut xtenants: Vec<(i32, Vec<u8>)> = Vec::new();
    for identity in &identities {
        let used = partitions
            .used_partitions
            .iter()
            .find(|(name, _)| name == &identity.name)
            .map(|(_, set)| set.clone())
            .unwrap_or_default();

        let tenant_partition_keys: Vec<Vec<u8>> = partition_keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                if used.contains(&(i as i32)) {
                    key.to_vec()
                } else {
                    Vec::new()
                }
            })
            .collect();

        let files = partitions
            .files
            .iter()
            .find(|(name, _)| name == &identity.name)
            .map(|(_, m)| m.clone())
            .unwrap_or_default();

        let tenant_manifest = TenantManifest {
            partition_keys: tenant_partition_keys,
            files,
        };
        let encoded = tenant_manifest.encode();
        let compressed = compress(&encoded);

        let writer_bytes: [u8; 64] = identity
            .writer_key
            .as_slice()
            .try_into()
            .expect("writer_key is always 64 bytes");
        let writer = WriterKey(writer_bytes);
        let sealed = primitives::asymm_encrypt(&compressed, &writer)?;
        xtenants.push((identity.key_id, sealed));
    }

    info!(tenants = xtenants.len(), max_id, "sealed blob");

    Ok(CryptoBlob {
        version: CURRENT_VERSION,
        max_id,
        xpartitions,
        xmaster,
        xtenants,
    })
}

/// Decodes a textual `reader_key` as emitted by [`crate::model`]'s wire
/// form helpers back into a [`ReaderKey`].
pub fn reader_key_from_bytes(bytes: &[u8]) -> Result<ReaderKey> {
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| crate::error::CryptoBlobError::SchemaError("reader_key must be 64 bytes".into()))?;
    Ok(ReaderKey(arr))
}
