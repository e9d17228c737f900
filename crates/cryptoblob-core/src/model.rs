//! The on-disk data model: file entries, partitions, tenant keys, and the
//! master/tenant/outer records, with their Avro-schemaless codecs per the
//! frozen wire format.

use crate::codec::{Decoder, Encoder};
use crate::error::{CryptoBlobError, Result};

/// Entry is a symbolic link.
pub const FLAG_SYMLINK: i32 = 1;
/// The stored link target was absolute at collection time and has been
/// normalised relative to the principal root.
pub const FLAG_SYMLINK_ABS: i32 = 2;

pub const CURRENT_VERSION: i32 = 1;

/// `FileItem.1 = record { mtime_ns:long, flags:int, partition_id:int, body_id:int }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileItem {
    pub mtime_ns: i64,
    pub flags: i32,
    pub partition_id: i32,
    pub body_id: i32,
}

impl FileItem {
    pub fn is_symlink(&self) -> bool {
        self.flags & FLAG_SYMLINK != 0
    }

    pub fn is_symlink_abs(&self) -> bool {
        self.flags & FLAG_SYMLINK_ABS != 0
    }

    fn write(&self, enc: &mut Encoder) {
        enc.write_long(self.mtime_ns);
        enc.write_int(self.flags);
        enc.write_int(self.partition_id);
        enc.write_int(self.body_id);
    }

    fn read(dec: &mut Decoder) -> Result<Self> {
        Ok(Self {
            mtime_ns: dec.read_long()?,
            flags: dec.read_int()?,
            partition_id: dec.read_int()?,
            body_id: dec.read_int()?,
        })
    }
}

/// `TenantKeys.1 = record { tenant_name:string, key_id:int, writer_key:bytes, reader_key:bytes }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantKeys {
    pub tenant_name: String,
    pub key_id: i32,
    pub writer_key: Vec<u8>,
    pub reader_key: Vec<u8>,
}

impl TenantKeys {
    fn write(&self, enc: &mut Encoder) {
        enc.write_string(&self.tenant_name);
        enc.write_int(self.key_id);
        enc.write_bytes(&self.writer_key);
        enc.write_bytes(&self.reader_key);
    }

    fn read(dec: &mut Decoder) -> Result<Self> {
        Ok(Self {
            tenant_name: dec.read_string()?,
            key_id: dec.read_int()?,
            writer_key: dec.read_bytes()?,
            reader_key: dec.read_bytes()?,
        })
    }
}

/// `partition.1 = array<bytes>` — the decompressed, decrypted body list of
/// one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub bodies: Vec<Vec<u8>>,
}

impl Partition {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_array(&self.bodies, |e, b| e.write_bytes(b));
        enc.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let bodies = dec.read_array(|d| d.read_bytes())?;
        Ok(Self { bodies })
    }
}

/// One principal's `relpath -> FileItem` mapping.
pub type FileMap = Vec<(String, FileItem)>;

/// `master.1 = record { partition_keys: array<bytes>, files: map<string, map<string, FileItem.1>>, tenants_keys: array<TenantKeys.1> }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterManifest {
    pub partition_keys: Vec<Vec<u8>>,
    /// principal name (`""` for master) -> relpath -> item
    pub files: Vec<(String, FileMap)>,
    pub tenants_keys: Vec<TenantKeys>,
}

impl MasterManifest {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_array(&self.partition_keys, |e, b| e.write_bytes(b));
        enc.write_map(
            &self
                .files
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect::<Vec<_>>(),
            |e, file_map| {
                e.write_map(
                    &file_map
                        .iter()
                        .map(|(k, v)| (k.as_str(), v))
                        .collect::<Vec<_>>(),
                    |e, item| item.write(e),
                );
            },
        );
        enc.write_array(&self.tenants_keys, |e, tk| tk.write(e));
        enc.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let partition_keys = dec.read_array(|d| d.read_bytes())?;
        let files = dec.read_map(|d| d.read_map(|d| FileItem::read(d)))?;
        let tenants_keys = dec.read_array(|d| TenantKeys::read(d))?;
        Ok(Self {
            partition_keys,
            files,
            tenants_keys,
        })
    }

    pub fn principal_files(&self, principal: &str) -> Option<&FileMap> {
        self.files
            .iter()
            .find(|(name, _)| name == principal)
            .map(|(_, m)| m)
    }
}

/// `tenant.1 = record { partition_keys: array<bytes>, files: map<string, FileItem.1> }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantManifest {
    /// Empty `Vec` at index `i` means the tenant has no key for partition `i`.
    pub partition_keys: Vec<Vec<u8>>,
    pub files: FileMap,
}

impl TenantManifest {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_array(&self.partition_keys, |e, b| e.write_bytes(b));
        enc.write_map(
            &self
                .files
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect::<Vec<_>>(),
            |e, item| item.write(e),
        );
        enc.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let partition_keys = dec.read_array(|d| d.read_bytes())?;
        let files = dec.read_map(|d| FileItem::read(d))?;
        Ok(Self {
            partition_keys,
            files,
        })
    }
}

/// `blob.1 = record { max_id:long, master:bytes, partitions:array<bytes>, tenants:map<string,bytes> }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CryptoBlobBody {
    pub max_id: i64,
    pub master: Vec<u8>,
    pub partitions: Vec<Vec<u8>>,
    /// key is the decimal `key_id`
    pub tenants: Vec<(String, Vec<u8>)>,
}

impl CryptoBlobBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_long(self.max_id);
        enc.write_bytes(&self.master);
        enc.write_array(&self.partitions, |e, b| e.write_bytes(b));
        enc.write_map(
            &self
                .tenants
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect::<Vec<_>>(),
            |e, b| e.write_bytes(b),
        );
        enc.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let max_id = dec.read_long()?;
        let master = dec.read_bytes()?;
        let partitions = dec.read_array(|d| d.read_bytes())?;
        let tenants = dec.read_map(|d| d.read_bytes())?;
        Ok(Self {
            max_id,
            master,
            partitions,
            tenants,
        })
    }

    pub fn tenant_bytes(&self, key_id: i32) -> Option<&[u8]> {
        let key = key_id.to_string();
        self.tenants
            .iter()
            .find(|(k, _)| k == &key)
            .map(|(_, v)| v.as_slice())
    }
}

/// Full outer framing: `blob_header(version) || body(<version>)`.
pub fn encode_blob(version: i32, body: &CryptoBlobBody) -> Result<Vec<u8>> {
    if version != CURRENT_VERSION {
        return Err(CryptoBlobError::UnsupportedVersion(version as i64));
    }
    let mut out = crate::codec::encode_blob_header(version);
    out.extend_from_slice(&body.encode());
    Ok(out)
}

/// Reverses [`encode_blob`].
pub fn decode_blob(data: &[u8]) -> Result<(i32, CryptoBlobBody)> {
    let (version, consumed) = crate::codec::decode_blob_header(data)?;
    if version != CURRENT_VERSION {
        return Err(CryptoBlobError::UnsupportedVersion(version as i64));
    }
    let body = CryptoBlobBody::decode(&data[consumed..])?;
    Ok((version, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_item_roundtrip() {
        let item = FileItem {
            mtime_ns: 1_700_000_000_000_000_000,
            flags: FLAG_SYMLINK | FLAG_SYMLINK_ABS,
            partition_id: 3,
            body_id: 7,
        };
        let mut enc = Encoder::new();
        item.write(&mut enc);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(FileItem::read(&mut dec).unwrap(), item);
    }

    #[test]
    fn partition_roundtrip() {
        let partition = Partition {
            bodies: vec![b"one".to_vec(), b"two".to_vec()],
        };
        let encoded = partition.encode();
        assert_eq!(Partition::decode(&encoded).unwrap(), partition);
    }

    #[test]
    fn master_manifest_roundtrip() {
        let manifest = MasterManifest {
            partition_keys: vec![vec![1, 2, 3], vec![]],
            files: vec![(
                "".to_string(),
                vec![(
                    "a.txt".to_string(),
                    FileItem {
                        mtime_ns: 1,
                        flags: 0,
                        partition_id: 0,
                        body_id: 0,
                    },
                )],
            )],
            tenants_keys: vec![TenantKeys {
                tenant_name: "acme".to_string(),
                key_id: 1,
                writer_key: vec![0u8; 64],
                reader_key: vec![1u8; 64],
            }],
        };
        let encoded = manifest.encode();
        assert_eq!(MasterManifest::decode(&encoded).unwrap(), manifest);
    }

    #[test]
    fn tenant_manifest_roundtrip_with_holes() {
        let manifest = TenantManifest {
            partition_keys: vec![vec![], vec![9, 9], vec![]],
            files: vec![(
                "b.txt".to_string(),
                FileItem {
                    mtime_ns: 2,
                    flags: 0,
                    partition_id: 1,
                    body_id: 0,
                },
            )],
        };
        let encoded = manifest.encode();
        assert_eq!(TenantManifest::decode(&encoded).unwrap(), manifest);
    }

    #[test]
    fn blob_body_roundtrip() {
        let body = CryptoBlobBody {
            max_id: 2,
            master: vec![1, 2, 3],
            partitions: vec![vec![4, 5], vec![]],
            tenants: vec![("1".to_string(), vec![6, 7, 8])],
        };
        let encoded = encode_blob(1, &body).unwrap();
        let (version, decoded) = decode_blob(&encoded).unwrap();
        assert_eq!(version, 1);
        assert_eq!(decoded, body);
    }

    #[test]
    fn unsupported_version_rejected() {
        let body = CryptoBlobBody::default();
        assert!(matches!(
            encode_blob(2, &body),
            Err(CryptoBlobError::UnsupportedVersion(2))
        ));
    }
}
