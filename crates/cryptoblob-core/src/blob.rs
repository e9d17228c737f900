//! The outer `CryptoBlob` container: version, `max_id`, encrypted
//! partitions, encrypted master manifest, and the per-tenant encrypted
//! manifests, plus its outer wire framing.

use crate::error::Result;
use crate::model::{self, CryptoBlobBody, CURRENT_VERSION};

/// The persisted top-level object. Every field except `version` and
/// `max_id` is already encrypted ciphertext; nothing here can be inspected
/// without the matching key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CryptoBlob {
    pub version: i32,
    pub max_id: i64,
    pub xpartitions: Vec<Vec<u8>>,
    pub xmaster: Vec<u8>,
    /// `key_id -> encrypted tenant manifest`
    pub xtenants: Vec<(i32, Vec<u8>)>,
}

impl CryptoBlob {
    /// Serialises the outer container: `blob_header(version) ‖ body`.
    pub fn dump_to_blob(&self) -> Result<Vec<u8>> {
        let body = CryptoBlobBody {
            max_id: self.max_id,
            master: self.xmaster.clone(),
            partitions: self.xpartitions.clone(),
            tenants: self
                .xtenants
                .iter()
                .map(|(id, bytes)| (id.to_string(), bytes.clone()))
                .collect(),
        };
        model::encode_blob(self.version, &body)
    }

    /// Parses the outer container, validating the version is one this
    /// build understands.
    pub fn load_from_blob(data: &[u8]) -> Result<Self> {
        let (version, body) = model::decode_blob(data)?;
        let xtenants = body
            .tenants
            .into_iter()
            .map(|(key, bytes)| {
                let key_id: i32 = key.parse().unwrap_or_default();
                (key_id, bytes)
            })
            .collect();
        Ok(Self {
            version,
            max_id: body.max_id,
            xpartitions: body.partitions,
            xmaster: body.master,
            xtenants,
        })
    }

    pub fn tenant_bytes(&self, key_id: i32) -> Option<&[u8]> {
        self.xtenants
            .iter()
            .find(|(id, _)| *id == key_id)
            .map(|(_, b)| b.as_slice())
    }
}

impl CryptoBlob {
    pub fn new_empty() -> Self {
        Self {
            version: CURRENT_VERSION,
            max_id: 0,
            xpartitions: Vec::new(),
            xmaster: Vec::new(),
            xtenants: Vec::new(),
        }
    }
}
