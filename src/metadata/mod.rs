//! Per-file metadata rows
//!
//! One row per stored blob. The storage path points to exactly one
//! envelope, and the recorded key id must exist in the key store (it may be
//! inactive, never deleted) for the file to remain decryptable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted file metadata row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// File id; doubles as the KDF binding input for the envelope
    #[serde(rename = "fileId")]
    pub id: Uuid,

    /// Original upload filename
    #[serde(rename = "fileName")]
    pub file_name: String,

    /// Human-facing display name
    #[serde(rename = "displayName")]
    pub display_name: String,

    /// Absolute blob path on disk
    #[serde(rename = "storagePath")]
    pub storage_path: String,

    /// Plaintext size in bytes
    pub size: u64,

    /// Id of the public key the file key was wrapped under
    #[serde(rename = "keyId")]
    pub key_id: Uuid,

    /// Tenant practice-area the case is filed under
    #[serde(rename = "tenantArea")]
    pub tenant_area: String,

    /// Owning case id
    #[serde(rename = "caseId")]
    pub case_id: String,

    /// Uploader's actor id
    #[serde(rename = "uploadedBy")]
    pub uploaded_by: String,

    /// Upload timestamp
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: DateTime<Utc>,
}
