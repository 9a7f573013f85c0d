use thiserror::Error;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the file vault
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid vault configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No active wrapping/signing key is available
    #[error("No active key: {0}")]
    NoActiveKey(String),

    /// A referenced key does not exist in the key store
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Envelope signature verification failed
    #[error("Tampered or corrupted envelope: {0}")]
    SignatureInvalid(String),

    /// Unwrapped file key does not match the KDF re-derivation
    #[error("File key mismatch: {0}")]
    KeyMismatch(String),

    /// Cryptographic operation failure (AEAD tag mismatch, unwrap failure)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Blob carries a version tag this build cannot read
    #[error("Unsupported envelope format version {0}")]
    UnsupportedFormat(u32),

    /// Blob ended before a declared field was fully read
    #[error("Truncated envelope data: {0}")]
    Truncated(String),

    /// Errors related to I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the relational repositories
    #[error("Repository error: {0}")]
    Repository(String),

    /// File metadata not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Metadata exists but the blob is missing on disk
    #[error("Blob missing on disk: {0}")]
    MissingBlob(String),

    /// Decryption produced a zero-length payload
    #[error("Decrypted content is empty")]
    EmptyContent,

    /// Access token is malformed or unknown
    #[error("Invalid access token: {0}")]
    InvalidToken(String),

    /// Access token has expired
    #[error("Access token expired: {0}")]
    TokenExpired(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns true for tamper/corruption failures, as distinct from I/O
    /// or lookup failures. A caller seeing one of these must treat the
    /// envelope contents as untrustworthy.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::SignatureInvalid(_)
                | Error::KeyMismatch(_)
                | Error::Crypto(_)
                | Error::EmptyContent
        )
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Repository(err.to_string())
    }
}
