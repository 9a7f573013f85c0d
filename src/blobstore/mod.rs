//! Durable on-disk representation of envelopes
//!
//! Layout is a de facto wire format and must stay byte-stable: a 4-byte
//! little-endian version tag (`1`), then six length-prefixed fields in
//! fixed order (iv, salt, auth_tag, wrapped_key, signature, ciphertext),
//! each a 4-byte little-endian length followed by that many raw bytes.
//!
//! Blobs are organized `<root>/<tenant area>/<year>/<case>/<file id><ext>`.
//! The tenant-area segment is sanitized by stripping characters invalid in
//! paths while preserving non-ASCII text; legal-area names are in the
//! tenant's local script.

use crate::envelope::{Envelope, FORMAT_VERSION};
use crate::error::{Error, Result};

use chrono::{Datelike, Utc};
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, BufReader};
use uuid::Uuid;

/// Upper bound on any single serialized field
///
/// A corrupt length prefix must not drive a multi-gigabyte allocation.
const MAX_FIELD_LEN: usize = 1 << 30;

/// Characters stripped from path segments
///
/// The union of Windows- and Unix-invalid path characters; everything
/// else, non-ASCII included, passes through untouched.
const INVALID_PATH_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Strips filesystem-invalid characters from a path segment
///
/// Allow-list-by-exclusion: only characters from the invalid set (and
/// control characters) are removed. An all-invalid input collapses to "_"
/// rather than an empty segment.
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .filter(|c| !INVALID_PATH_CHARS.contains(c) && !c.is_control())
        .collect();

    if cleaned.trim().is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Envelope persistence rooted at a storage directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Creates a new BlobStore rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the conventional blob path for a file
    ///
    /// The extension is carried over from the original upload filename so
    /// operators can recognize blobs on disk; content stays encrypted.
    pub fn blob_path(&self, tenant_area: &str, case_id: &str, file_id: Uuid, original_name: &str) -> PathBuf {
        let extension = Path::new(original_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        self.root
            .join(sanitize_segment(tenant_area))
            .join(Utc::now().year().to_string())
            .join(sanitize_segment(case_id))
            .join(format!("{}{}", file_id, extension))
    }

    /// Serializes an envelope to the given path
    ///
    /// Parent directories are created as needed; creation is idempotent and
    /// tolerates races between concurrent uploads into the same case
    /// folder. The write is direct; a torn write under crash is an accepted
    /// risk.
    pub async fn write(&self, envelope: &Envelope, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut buf = Vec::with_capacity(
            4 + 6 * 4
                + envelope.iv.len()
                + envelope.salt.len()
                + envelope.auth_tag.len()
                + envelope.wrapped_key.len()
                + envelope.signature.len()
                + envelope.ciphertext.len(),
        );
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        for field in [
            &envelope.iv,
            &envelope.salt,
            &envelope.auth_tag,
            &envelope.wrapped_key,
            &envelope.signature,
            &envelope.ciphertext,
        ] {
            buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
            buf.extend_from_slice(field);
        }

        fs::write(path, &buf).await?;
        debug!("wrote {} byte blob to {}", buf.len(), path.display());

        Ok(path.to_path_buf())
    }

    /// Reads an envelope back from the given path
    ///
    /// Fails with an unsupported-format error if the version tag is not
    /// exactly [`FORMAT_VERSION`], without attempting to parse further
    /// fields. Short reads from the underlying transport are retried until
    /// each field is satisfied; end-of-stream mid-field is a truncated-data
    /// error.
    pub async fn read(&self, path: &Path) -> Result<Envelope> {
        let file = fs::File::open(path).await?;
        let mut reader = BufReader::new(file);

        let version = read_u32(&mut reader, path).await?;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(version));
        }

        let iv = read_field(&mut reader, path).await?;
        let salt = read_field(&mut reader, path).await?;
        let auth_tag = read_field(&mut reader, path).await?;
        let wrapped_key = read_field(&mut reader, path).await?;
        let signature = read_field(&mut reader, path).await?;
        let ciphertext = read_field(&mut reader, path).await?;

        Ok(Envelope {
            iv,
            salt,
            auth_tag,
            wrapped_key,
            signature,
            ciphertext,
        })
    }

    /// Returns true if a blob exists at the given path
    pub async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path).await?)
    }
}

async fn read_u32<R: AsyncReadExt + Unpin>(reader: &mut R, path: &Path) -> Result<u32> {
    let mut bytes = [0_u8; 4];
    reader.read_exact(&mut bytes).await.map_err(|e| map_eof(e, path))?;
    Ok(u32::from_le_bytes(bytes))
}

async fn read_field<R: AsyncReadExt + Unpin>(reader: &mut R, path: &Path) -> Result<Vec<u8>> {
    let len = read_u32(reader, path).await? as usize;
    if len > MAX_FIELD_LEN {
        return Err(Error::Truncated(format!(
            "implausible field length {} in {}",
            len,
            path.display()
        )));
    }

    let mut field = vec![0_u8; len];
    reader.read_exact(&mut field).await.map_err(|e| map_eof(e, path))?;
    Ok(field)
}

fn map_eof(e: std::io::Error, path: &Path) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Truncated(format!("unexpected end of data in {}", path.display()))
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_envelope() -> Envelope {
        Envelope {
            iv: vec![1; 12],
            salt: vec![2; 32],
            auth_tag: vec![3; 16],
            wrapped_key: vec![4; 256],
            signature: vec![5; 256],
            ciphertext: b"not really ciphertext".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = BlobStore::new(dir.path());
        let path = dir.path().join("a/b/blob.bin");

        let envelope = sample_envelope();
        store.write(&envelope, &path).await.expect("write");

        let read_back = store.read(&path).await.expect("read");
        assert_eq!(read_back, envelope);
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = BlobStore::new(dir.path());
        let path = dir.path().join("blob.bin");

        store.write(&sample_envelope(), &path).await.expect("write");

        // Rewrite the version tag to 2
        let mut bytes = std::fs::read(&path).expect("read raw");
        bytes[..4].copy_from_slice(&2_u32.to_le_bytes());
        std::fs::write(&path, &bytes).expect("write raw");

        let err = store.read(&path).await.expect_err("version 2");
        assert!(matches!(err, Error::UnsupportedFormat(2)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_truncated_blob_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = BlobStore::new(dir.path());
        let path = dir.path().join("blob.bin");

        store.write(&sample_envelope(), &path).await.expect("write");

        let bytes = std::fs::read(&path).expect("read raw");
        std::fs::write(&path, &bytes[..bytes.len() - 5]).expect("truncate");

        let err = store.read(&path).await.expect_err("truncated");
        assert!(matches!(err, Error::Truncated(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_implausible_length_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = BlobStore::new(dir.path());
        let path = dir.path().join("blob.bin");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).expect("write raw");

        let err = store.read(&path).await.expect_err("giant length");
        assert!(matches!(err, Error::Truncated(_)), "got {:?}", err);
    }

    #[test]
    fn test_sanitize_preserves_non_ascii() {
        assert_eq!(sanitize_segment("Εργατικό Δίκαιο"), "Εργατικό Δίκαιο");
        assert_eq!(sanitize_segment("družinsko pravo"), "družinsko pravo");
        assert_eq!(sanitize_segment("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(sanitize_segment("///"), "_");
    }

    #[test]
    fn test_blob_path_layout() {
        let store = BlobStore::new("/data/vault");
        let file_id = Uuid::new_v4();
        let path = store.blob_path("Εμπορικό/Δίκαιο", "case-7", file_id, "λογαριασμός.pdf");

        let year = Utc::now().year().to_string();
        let expected = PathBuf::from("/data/vault")
            .join("ΕμπορικόΔίκαιο")
            .join(year)
            .join("case-7")
            .join(format!("{}.pdf", file_id));
        assert_eq!(path, expected);
    }
}
