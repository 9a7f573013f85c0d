//! File vault orchestration
//!
//! The service the rest of the application talks to. Upload runs encrypt →
//! blob write → metadata insert strictly in sequence; retrieval re-reads
//! and re-decrypts from disk on every call. No plaintext is ever cached;
//! case documents are read rarely and a decrypted cache would widen the
//! attack surface.

use crate::blobstore::BlobStore;
use crate::config::VaultConfig;
use crate::envelope::EnvelopeCodec;
use crate::error::{Error, Result};
use crate::keys::KeyStore;
use crate::metadata::FileMetadata;
use crate::MetadataRepository;

use chrono::Utc;
use log::{error, info};
use metrics::{counter, histogram};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file_id: Uuid,
    pub path: PathBuf,
    pub size: u64,
}

/// A decrypted file plus its naming metadata
#[derive(Clone)]
pub struct RetrievedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub display_name: String,
}

impl std::fmt::Debug for RetrievedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievedFile")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("file_name", &self.file_name)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// The encrypted file vault service
#[derive(Debug)]
pub struct FileVault {
    keys: Arc<KeyStore>,
    metadata: Arc<dyn MetadataRepository>,
    blobs: BlobStore,
    codec: EnvelopeCodec,
}

impl FileVault {
    /// Creates a new FileVault from explicit configuration
    pub fn new(
        config: VaultConfig,
        keys: Arc<KeyStore>,
        metadata: Arc<dyn MetadataRepository>,
    ) -> Self {
        Self {
            keys,
            metadata,
            blobs: BlobStore::new(config.storage_root),
            codec: EnvelopeCodec::new(config.master_passphrase),
        }
    }

    /// Encrypts and persists an uploaded file
    ///
    /// Steps run strictly in sequence: active key fetch, envelope
    /// encryption, blob write, metadata insert. A disk failure leaves no
    /// metadata row; a metadata failure after a successful write leaves an
    /// orphan blob on disk, which is logged and accepted rather than
    /// compensated (no transaction spans the filesystem/database boundary).
    pub async fn upload(
        &self,
        content: &[u8],
        file_name: &str,
        display_name: &str,
        tenant_area: &str,
        case_id: &str,
        uploader: &str,
    ) -> Result<UploadOutcome> {
        let start = Instant::now();
        counter!("vault.upload", 1);

        let file_id = Uuid::new_v4();
        info!("upload start: file {} for case {}", file_id, case_id);

        let wrapping = self.keys.active_public_key().await?;
        let signing = self.keys.active_private_key().await?;

        let envelope = self.codec.encrypt(
            content,
            &file_id.to_string(),
            &wrapping.key,
            &signing.key,
        )?;

        let path = self.blobs.blob_path(tenant_area, case_id, file_id, file_name);
        self.blobs.write(&envelope, &path).await.map_err(|e| {
            error!("blob write failed for file {}: {}", file_id, e);
            e
        })?;

        let metadata = FileMetadata {
            id: file_id,
            file_name: file_name.to_string(),
            display_name: display_name.to_string(),
            storage_path: path.to_string_lossy().into_owned(),
            size: content.len() as u64,
            key_id: wrapping.id,
            tenant_area: tenant_area.to_string(),
            case_id: case_id.to_string(),
            uploaded_by: uploader.to_string(),
            uploaded_at: Utc::now(),
        };
        if let Err(e) = self.metadata.insert(&metadata).await {
            // Blob is already on disk and now unreferenced; surfaced for
            // operator follow-up, not rolled back
            error!(
                "metadata insert failed for file {}; orphan blob at {}: {}",
                file_id,
                path.display(),
                e
            );
            return Err(e);
        }

        info!("upload complete: file {} ({} bytes)", file_id, metadata.size);
        histogram!("vault.upload.time", start.elapsed());

        Ok(UploadOutcome {
            file_id,
            path,
            size: metadata.size,
        })
    }

    /// Loads, verifies, and decrypts a stored file
    ///
    /// Metadata absence is `NotFound`; metadata present but blob missing on
    /// disk is the distinct `MissingBlob` (operational inconsistency, not a
    /// security signal). Any integrity failure aborts with zero bytes
    /// returned.
    pub async fn retrieve(&self, file_id: Uuid) -> Result<RetrievedFile> {
        let start = Instant::now();
        counter!("vault.retrieve", 1);
        info!("retrieve start: file {}", file_id);

        let metadata = self
            .metadata
            .find_by_id(file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {} does not exist", file_id)))?;

        let path = Path::new(&metadata.storage_path);
        if !self.blobs.exists(path).await? {
            error!("blob missing on disk for file {}: {}", file_id, metadata.storage_path);
            return Err(Error::MissingBlob(metadata.storage_path.clone()));
        }

        let envelope = self.blobs.read(path).await?;

        let (verifying, unwrapping) = self.keys.pair_for_public(metadata.key_id).await?;

        let bytes = self
            .codec
            .decrypt(&envelope, &unwrapping.key, &verifying.key, &file_id.to_string())
            .map_err(|e| {
                error!("decrypt failed for file {}: {}", file_id, e);
                e
            })?;

        info!("retrieve complete: file {} ({} bytes)", file_id, bytes.len());
        histogram!("vault.retrieve.time", start.elapsed());

        Ok(RetrievedFile {
            bytes,
            file_name: metadata.file_name,
            display_name: metadata.display_name,
        })
    }

    /// Lists metadata for one case within one tenant area
    pub async fn list_case_files(&self, case_id: &str, tenant_area: &str) -> Result<Vec<FileMetadata>> {
        self.metadata.find_by_case(case_id, tenant_area).await
    }

    /// Looks up a single metadata row
    pub async fn file_metadata(&self, file_id: Uuid) -> Result<FileMetadata> {
        self.metadata
            .find_by_id(file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {} does not exist", file_id)))
    }

    /// Removes a file's metadata row
    ///
    /// Blob deletion is intentionally not performed here; reclaiming disk
    /// space is an operator concern.
    pub async fn delete(&self, file_id: Uuid) -> Result<()> {
        let found = self.metadata.delete(file_id).await?;
        if !found {
            return Err(Error::NotFound(format!("file {} does not exist", file_id)));
        }

        info!("deleted metadata for file {}", file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyPolicy;
    use crate::repository::{InMemoryKeyRepository, InMemoryMetadataRepository};
    use tempfile::tempdir;

    async fn vault_with_keys(root: &Path) -> (FileVault, Arc<KeyStore>) {
        let keys = Arc::new(KeyStore::new(
            Arc::new(InMemoryKeyRepository::new()),
            KeyPolicy::new(),
        ));
        keys.generate_key_pair("test").await.expect("generate");

        let config = VaultConfig::new("test passphrase", root).expect("config");
        let vault = FileVault::new(config, keys.clone(), Arc::new(InMemoryMetadataRepository::new()));
        (vault, keys)
    }

    #[tokio::test]
    async fn test_upload_retrieve_round_trip() {
        let dir = tempdir().expect("tempdir");
        let (vault, _) = vault_with_keys(dir.path()).await;

        let outcome = vault
            .upload(b"hello docs", "notes.txt", "Case notes", "civil", "case-1", "user-1")
            .await
            .expect("upload");
        assert_eq!(outcome.size, 10);
        assert!(outcome.path.starts_with(dir.path()));

        let file = vault.retrieve(outcome.file_id).await.expect("retrieve");
        assert_eq!(file.bytes, b"hello docs");
        assert_eq!(file.file_name, "notes.txt");
        assert_eq!(file.display_name, "Case notes");
    }

    #[tokio::test]
    async fn test_upload_without_keys_writes_nothing() {
        let dir = tempdir().expect("tempdir");
        let keys = Arc::new(KeyStore::new(
            Arc::new(InMemoryKeyRepository::new()),
            KeyPolicy::new(),
        ));
        let config = VaultConfig::new("test passphrase", dir.path()).expect("config");
        let vault = FileVault::new(config, keys, Arc::new(InMemoryMetadataRepository::new()));

        let err = vault
            .upload(b"payload", "f.bin", "f", "civil", "case-1", "user-1")
            .await
            .expect_err("no active key");
        assert!(matches!(err, Error::NoActiveKey(_)), "got {:?}", err);

        // Nothing reached the disk
        let entries: Vec<_> = std::fs::read_dir(dir.path()).expect("read dir").collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_unknown_file() {
        let dir = tempdir().expect("tempdir");
        let (vault, _) = vault_with_keys(dir.path()).await;

        let err = vault.retrieve(Uuid::new_v4()).await.expect_err("unknown file");
        assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_retrieve_missing_blob_is_distinct_error() {
        let dir = tempdir().expect("tempdir");
        let (vault, _) = vault_with_keys(dir.path()).await;

        let outcome = vault
            .upload(b"payload", "f.bin", "f", "civil", "case-1", "user-1")
            .await
            .expect("upload");
        std::fs::remove_file(&outcome.path).expect("remove blob");

        let err = vault.retrieve(outcome.file_id).await.expect_err("missing blob");
        assert!(matches!(err, Error::MissingBlob(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_retrieve_survives_key_rotation() {
        let dir = tempdir().expect("tempdir");
        let (vault, keys) = vault_with_keys(dir.path()).await;

        let outcome = vault
            .upload(b"old generation", "f.bin", "f", "civil", "case-1", "user-1")
            .await
            .expect("upload");

        keys.rotate_keys().await.expect("rotate");

        let file = vault.retrieve(outcome.file_id).await.expect("retrieve");
        assert_eq!(file.bytes, b"old generation");
    }

    #[tokio::test]
    async fn test_delete_removes_metadata_only() {
        let dir = tempdir().expect("tempdir");
        let (vault, _) = vault_with_keys(dir.path()).await;

        let outcome = vault
            .upload(b"payload", "f.bin", "f", "civil", "case-1", "user-1")
            .await
            .expect("upload");

        vault.delete(outcome.file_id).await.expect("delete");
        let err = vault.retrieve(outcome.file_id).await.expect_err("metadata gone");
        assert!(matches!(err, Error::NotFound(_)));

        // Blob deletion is out of scope; the file stays on disk
        assert!(outcome.path.exists());
    }
}
