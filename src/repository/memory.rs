use crate::error::Result;
use crate::keys::{KeyKind, KeyRecord};
use crate::metadata::FileMetadata;
use crate::token::AccessToken;
use crate::{KeyRepository, MetadataRepository, TokenRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// An in-memory implementation of the KeyRepository trait
///
/// Useful for testing; keys are lost when the process terminates, which
/// makes previously written blobs permanently undecryptable.
#[derive(Debug, Default)]
pub struct InMemoryKeyRepository {
    store: Arc<RwLock<HashMap<Uuid, KeyRecord>>>,
}

impl InMemoryKeyRepository {
    /// Creates a new InMemoryKeyRepository
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl InMemoryKeyRepository {
    /// Test support: rewrites a record's creation timestamp
    pub(crate) async fn backdate(&self, id: Uuid, created_at: DateTime<Utc>) {
        let mut store = self.store.write().unwrap();
        if let Some(record) = store.get_mut(&id) {
            record.created_at = created_at;
        }
    }
}

#[async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn insert(&self, record: &KeyRecord) -> Result<()> {
        let mut store = self.store.write().unwrap();
        store.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<KeyRecord>> {
        let store = self.store.read().unwrap();
        Ok(store.get(&id).cloned())
    }

    async fn find_latest_active(&self, kind: KeyKind) -> Result<Option<KeyRecord>> {
        let store = self.store.read().unwrap();
        Ok(store
            .values()
            .filter(|r| r.kind == kind && r.active)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_active_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<KeyRecord>> {
        let store = self.store.read().unwrap();
        Ok(store
            .values()
            .filter(|r| r.active && r.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn find_private_by_pair(&self, pair_id: Uuid) -> Result<Option<KeyRecord>> {
        let store = self.store.read().unwrap();
        Ok(store
            .values()
            .find(|r| r.pair_id == pair_id && r.kind == KeyKind::AsymPrivate)
            .cloned())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let mut store = self.store.write().unwrap();
        match store.get_mut(&id) {
            Some(record) => {
                record.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An in-memory implementation of the MetadataRepository trait
#[derive(Debug, Default)]
pub struct InMemoryMetadataRepository {
    store: Arc<RwLock<HashMap<Uuid, FileMetadata>>>,
}

impl InMemoryMetadataRepository {
    /// Creates a new InMemoryMetadataRepository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataRepository for InMemoryMetadataRepository {
    async fn insert(&self, metadata: &FileMetadata) -> Result<()> {
        let mut store = self.store.write().unwrap();
        store.insert(metadata.id, metadata.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<FileMetadata>> {
        let store = self.store.read().unwrap();
        Ok(store.get(&id).cloned())
    }

    async fn find_by_case(&self, case_id: &str, tenant_area: &str) -> Result<Vec<FileMetadata>> {
        let store = self.store.read().unwrap();
        let mut rows: Vec<FileMetadata> = store
            .values()
            .filter(|m| m.case_id == case_id && m.tenant_area == tenant_area)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.uploaded_at);
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut store = self.store.write().unwrap();
        Ok(store.remove(&id).is_some())
    }
}

/// An in-memory implementation of the TokenRepository trait
#[derive(Debug, Default)]
pub struct InMemoryTokenRepository {
    store: Arc<RwLock<HashMap<Uuid, AccessToken>>>,
}

impl InMemoryTokenRepository {
    /// Creates a new InMemoryTokenRepository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn insert(&self, token: &AccessToken) -> Result<()> {
        let mut store = self.store.write().unwrap();
        store.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessToken>> {
        let store = self.store.read().unwrap();
        Ok(store.get(&id).cloned())
    }
}
