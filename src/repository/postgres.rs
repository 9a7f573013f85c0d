//! Postgres-backed repositories
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE vault_key (
//!     id         UUID PRIMARY KEY,
//!     pair_id    UUID NOT NULL,
//!     kind       TEXT NOT NULL,
//!     material   BYTEA NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL,
//!     active     BOOLEAN NOT NULL,
//!     label      TEXT NOT NULL
//! );
//!
//! CREATE TABLE vault_file (
//!     id           UUID PRIMARY KEY,
//!     file_name    TEXT NOT NULL,
//!     display_name TEXT NOT NULL,
//!     storage_path TEXT NOT NULL UNIQUE,
//!     size         BIGINT NOT NULL,
//!     key_id       UUID NOT NULL REFERENCES vault_key (id),
//!     tenant_area  TEXT NOT NULL,
//!     case_id      TEXT NOT NULL,
//!     uploaded_by  TEXT NOT NULL,
//!     uploaded_at  TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE vault_access_token (
//!     id         UUID PRIMARY KEY,
//!     file_id    UUID NOT NULL REFERENCES vault_file (id),
//!     created_by TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL,
//!     used       BOOLEAN NOT NULL
//! );
//! ```

use crate::error::{Error, Result};
use crate::keys::{KeyKind, KeyRecord};
use crate::metadata::FileMetadata;
use crate::token::AccessToken;
use crate::{KeyRepository, MetadataRepository, TokenRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn repo_err(e: sqlx::Error) -> Error {
    Error::Repository(e.to_string())
}

fn key_record_from_row(row: &PgRow) -> Result<KeyRecord> {
    let kind: String = row.try_get("kind").map_err(repo_err)?;
    Ok(KeyRecord {
        id: row.try_get("id").map_err(repo_err)?,
        pair_id: row.try_get("pair_id").map_err(repo_err)?,
        kind: KeyKind::parse(&kind)?,
        material: row.try_get("material").map_err(repo_err)?,
        created_at: row.try_get("created_at").map_err(repo_err)?,
        expires_at: row.try_get("expires_at").map_err(repo_err)?,
        active: row.try_get("active").map_err(repo_err)?,
        label: row.try_get("label").map_err(repo_err)?,
    })
}

fn metadata_from_row(row: &PgRow) -> Result<FileMetadata> {
    let size: i64 = row.try_get("size").map_err(repo_err)?;
    Ok(FileMetadata {
        id: row.try_get("id").map_err(repo_err)?,
        file_name: row.try_get("file_name").map_err(repo_err)?,
        display_name: row.try_get("display_name").map_err(repo_err)?,
        storage_path: row.try_get("storage_path").map_err(repo_err)?,
        size: size as u64,
        key_id: row.try_get("key_id").map_err(repo_err)?,
        tenant_area: row.try_get("tenant_area").map_err(repo_err)?,
        case_id: row.try_get("case_id").map_err(repo_err)?,
        uploaded_by: row.try_get("uploaded_by").map_err(repo_err)?,
        uploaded_at: row.try_get("uploaded_at").map_err(repo_err)?,
    })
}

fn token_from_row(row: &PgRow) -> Result<AccessToken> {
    Ok(AccessToken {
        id: row.try_get("id").map_err(repo_err)?,
        file_id: row.try_get("file_id").map_err(repo_err)?,
        created_by: row.try_get("created_by").map_err(repo_err)?,
        created_at: row.try_get("created_at").map_err(repo_err)?,
        expires_at: row.try_get("expires_at").map_err(repo_err)?,
        used: row.try_get("used").map_err(repo_err)?,
    })
}

/// Postgres implementation of the KeyRepository trait
#[derive(Debug, Clone)]
pub struct PgKeyRepository {
    pool: PgPool,
}

impl PgKeyRepository {
    /// Creates a new PgKeyRepository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyRepository for PgKeyRepository {
    async fn insert(&self, record: &KeyRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO vault_key (id, pair_id, kind, material, created_at, expires_at, active, label) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.pair_id)
        .bind(record.kind.as_str())
        .bind(&record.material)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.active)
        .bind(&record.label)
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<KeyRecord>> {
        let row = sqlx::query("SELECT * FROM vault_key WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_err)?;
        row.as_ref().map(key_record_from_row).transpose()
    }

    async fn find_latest_active(&self, kind: KeyKind) -> Result<Option<KeyRecord>> {
        let row = sqlx::query(
            "SELECT * FROM vault_key WHERE kind = $1 AND active \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_err)?;
        row.as_ref().map(key_record_from_row).transpose()
    }

    async fn find_active_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<KeyRecord>> {
        let rows = sqlx::query("SELECT * FROM vault_key WHERE active AND created_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(repo_err)?;
        rows.iter().map(key_record_from_row).collect()
    }

    async fn find_private_by_pair(&self, pair_id: Uuid) -> Result<Option<KeyRecord>> {
        let row = sqlx::query("SELECT * FROM vault_key WHERE pair_id = $1 AND kind = $2")
            .bind(pair_id)
            .bind(KeyKind::AsymPrivate.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_err)?;
        row.as_ref().map(key_record_from_row).transpose()
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE vault_key SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(repo_err)?;
        Ok(result.rows_affected() > 0)
    }
}

/// Postgres implementation of the MetadataRepository trait
#[derive(Debug, Clone)]
pub struct PgMetadataRepository {
    pool: PgPool,
}

impl PgMetadataRepository {
    /// Creates a new PgMetadataRepository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataRepository for PgMetadataRepository {
    async fn insert(&self, metadata: &FileMetadata) -> Result<()> {
        sqlx::query(
            "INSERT INTO vault_file (id, file_name, display_name, storage_path, size, key_id, \
             tenant_area, case_id, uploaded_by, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(metadata.id)
        .bind(&metadata.file_name)
        .bind(&metadata.display_name)
        .bind(&metadata.storage_path)
        .bind(metadata.size as i64)
        .bind(metadata.key_id)
        .bind(&metadata.tenant_area)
        .bind(&metadata.case_id)
        .bind(&metadata.uploaded_by)
        .bind(metadata.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<FileMetadata>> {
        let row = sqlx::query("SELECT * FROM vault_file WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_err)?;
        row.as_ref().map(metadata_from_row).transpose()
    }

    async fn find_by_case(&self, case_id: &str, tenant_area: &str) -> Result<Vec<FileMetadata>> {
        let rows = sqlx::query(
            "SELECT * FROM vault_file WHERE case_id = $1 AND tenant_area = $2 \
             ORDER BY uploaded_at",
        )
        .bind(case_id)
        .bind(tenant_area)
        .fetch_all(&self.pool)
        .await
        .map_err(repo_err)?;
        rows.iter().map(metadata_from_row).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vault_file WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(repo_err)?;
        Ok(result.rows_affected() > 0)
    }
}

/// Postgres implementation of the TokenRepository trait
#[derive(Debug, Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    /// Creates a new PgTokenRepository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn insert(&self, token: &AccessToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO vault_access_token (id, file_id, created_by, created_at, expires_at, used) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(token.id)
        .bind(token.file_id)
        .bind(&token.created_by)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.used)
        .execute(&self.pool)
        .await
        .map_err(repo_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessToken>> {
        let row = sqlx::query("SELECT * FROM vault_access_token WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_err)?;
        row.as_ref().map(token_from_row).transpose()
    }
}
