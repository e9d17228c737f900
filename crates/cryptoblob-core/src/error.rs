use thiserror::Error;

/// Unified error type for the CryptoBlob core.
///
/// Every variant corresponds to one of the transport-neutral error kinds a
/// caller needs to distinguish: crypto failures are never recoverable, the
/// others each identify a specific malformed-input condition.
#[derive(Debug, Error)]
pub enum CryptoBlobError {
    #[error("decryption, authentication, or signature verification failed")]
    CryptoError,

    #[error("path is neither under master/ nor tenants/<name>/: {0}")]
    BadLayout(String),

    #[error("path escapes its principal root: {0}")]
    OutOfTree(String),

    #[error("unsupported filesystem node (not file, directory, or symlink): {0}")]
    UnsupportedNode(String),

    #[error("unsupported blob version: {0}")]
    UnsupportedVersion(i64),

    #[error("decoded record does not conform to schema: {0}")]
    SchemaError(String),

    #[error("storage or lock backend error: {0}")]
    BackendError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoBlobError>;
