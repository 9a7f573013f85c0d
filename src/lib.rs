//! # Encrypted File Vault
//!
//! `casevault` stores case documents as signed, encrypted envelopes on a
//! filesystem. Each file is encrypted with a per-file AES-256-GCM key that is
//! derived from a master passphrase and wrapped under a versioned RSA key
//! pair, so individual files can be decrypted (and audited) long after the
//! wrapping keys have been rotated. Short-lived access tokens allow a
//! browser preview surface to fetch protected content anonymously.
//!
//! The crate is organized leaf-first:
//!
//! - [`keys`] — versioned RSA wrapping/signing key pairs and rotation
//! - [`envelope`] — the signed-and-encrypted envelope codec (pure, no I/O)
//! - [`blobstore`] — length-prefixed on-disk representation of envelopes
//! - [`vault`] — upload/retrieve orchestration over the above
//! - [`token`] — per-file, time-limited access tokens
//! - [`api`] — the axum HTTP boundary
//!
//! Relational persistence is abstracted behind the [`KeyRepository`],
//! [`MetadataRepository`], and [`TokenRepository`] traits; in-memory
//! implementations live in [`repository`] and Postgres implementations are
//! available behind the `postgres` feature.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use casevault::config::{KeyPolicy, VaultConfig};
//! use casevault::keys::KeyStore;
//! use casevault::repository::{InMemoryKeyRepository, InMemoryMetadataRepository};
//! use casevault::vault::FileVault;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Explicit configuration, no ambient lookups
//! let config = VaultConfig::new("master passphrase", "/var/lib/casevault")?;
//!
//! // Key store needs at least one generated pair before any upload
//! let keys = Arc::new(KeyStore::new(
//!     Arc::new(InMemoryKeyRepository::new()),
//!     KeyPolicy::new(),
//! ));
//! keys.generate_key_pair("initial").await?;
//!
//! let vault = FileVault::new(config, keys, Arc::new(InMemoryMetadataRepository::new()));
//!
//! // Encrypt and persist
//! let outcome = vault
//!     .upload(
//!         b"contract text",
//!         "contract.pdf",
//!         "Signed contract",
//!         "Εργατικό Δίκαιο",
//!         "case-42",
//!         "user-7",
//!     )
//!     .await?;
//!
//! // Read back, verify, decrypt
//! let file = vault.retrieve(outcome.file_id).await?;
//! assert_eq!(file.bytes, b"contract text");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod blobstore;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod metadata;
pub mod repository;
pub mod token;
pub mod vault;

// Re-export key types
pub use crate::blobstore::BlobStore;
pub use crate::config::{KeyPolicy, VaultConfig};
pub use crate::envelope::{Envelope, EnvelopeCodec};
pub use crate::error::{Error, Result};
pub use crate::keys::{KeyKind, KeyRecord, KeyStore, RotationResult};
pub use crate::metadata::FileMetadata;
pub use crate::token::{AccessToken, AccessTokenBroker, IssuedToken};
pub use crate::vault::{FileVault, RetrievedFile, UploadOutcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Repository for versioned wrapping/signing key pairs
///
/// Keys are never physically deleted; deactivation is the only mutation.
#[async_trait]
pub trait KeyRepository: Send + Sync + fmt::Debug {
    /// Persists a new key record
    async fn insert(&self, record: &KeyRecord) -> Result<()>;

    /// Loads a key record by id, active or not
    async fn find_by_id(&self, id: Uuid) -> Result<Option<KeyRecord>>;

    /// Loads the most-recently-created active record of the given kind
    async fn find_latest_active(&self, kind: KeyKind) -> Result<Option<KeyRecord>>;

    /// Loads all active records created strictly before the cutoff
    async fn find_active_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<KeyRecord>>;

    /// Loads the private half of the generation identified by `pair_id`
    async fn find_private_by_pair(&self, pair_id: Uuid) -> Result<Option<KeyRecord>>;

    /// Sets the active flag on a record
    ///
    /// Returns false if no record with the given id exists
    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool>;
}

/// Repository for per-file metadata rows
#[async_trait]
pub trait MetadataRepository: Send + Sync + fmt::Debug {
    /// Persists a metadata row for a freshly written blob
    async fn insert(&self, metadata: &FileMetadata) -> Result<()>;

    /// Loads a metadata row by file id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<FileMetadata>>;

    /// Lists metadata for one case within one tenant area
    async fn find_by_case(&self, case_id: &str, tenant_area: &str) -> Result<Vec<FileMetadata>>;

    /// Removes a metadata row
    ///
    /// Returns false if no row with the given id exists
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Repository for access token rows
///
/// Tokens are never explicitly deleted; they expire naturally.
#[async_trait]
pub trait TokenRepository: Send + Sync + fmt::Debug {
    /// Persists a freshly issued token
    async fn insert(&self, token: &AccessToken) -> Result<()>;

    /// Loads a token by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessToken>>;
}
