//! Versioned RSA wrapping/signing key pairs
//!
//! The key store provides the currently active pair for new encryptions and
//! resolves any historical pair by id for decryption. Keys are deactivated
//! by rotation or revocation but never deleted; envelopes wrapped under an
//! old generation must stay decryptable.

use crate::config::KeyPolicy;
use crate::envelope::RSA_KEY_BITS;
use crate::error::{Error, Result};
use crate::KeyRepository;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use metrics::{counter, histogram};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Which half of an asymmetric pair a record holds
///
/// A tagged enum rather than a string discriminator: a private record can
/// never be passed where a public one is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Public half: wraps file keys, verifies signatures
    AsymPublic,
    /// Private half: unwraps file keys, produces signatures
    AsymPrivate,
}

impl KeyKind {
    /// Stable string form, used by the relational repositories
    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::AsymPublic => "asym-public",
            KeyKind::AsymPrivate => "asym-private",
        }
    }

    /// Parses the stable string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "asym-public" => Ok(KeyKind::AsymPublic),
            "asym-private" => Ok(KeyKind::AsymPrivate),
            other => Err(Error::Repository(format!("unknown key kind: {}", other))),
        }
    }
}

/// A persisted key row
///
/// `material` is DER: SPKI for public halves, PKCS#8 for private halves.
/// `pair_id` is shared by the two halves of one generation, which is how
/// the private half matching a recorded public key id is found at
/// decryption time.
#[derive(Clone)]
pub struct KeyRecord {
    pub id: Uuid,
    pub pair_id: Uuid,
    pub kind: KeyKind,
    pub material: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub label: String,
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("pair_id", &self.pair_id)
            .field("kind", &self.kind)
            .field("material", &format_args!("<{} bytes>", self.material.len()))
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("active", &self.active)
            .field("label", &self.label)
            .finish()
    }
}

/// Parsed public key plus the record id to cite in file metadata
#[derive(Debug, Clone)]
pub struct PublicKeyHandle {
    pub id: Uuid,
    pub pair_id: Uuid,
    pub key: RsaPublicKey,
}

/// Parsed private key plus its record id
#[derive(Clone)]
pub struct PrivateKeyHandle {
    pub id: Uuid,
    pub pair_id: Uuid,
    pub key: RsaPrivateKey,
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyHandle")
            .field("id", &self.id)
            .field("pair_id", &self.pair_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Both records produced by one generation
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    pub public: KeyRecord,
    pub private: KeyRecord,
}

/// Outcome of a rotation run
///
/// Deactivation is best-effort per key; `failed` reports how many stale
/// keys could not be deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationResult {
    pub deactivated: usize,
    pub failed: usize,
}

/// Key store service over a [`KeyRepository`]
#[derive(Debug)]
pub struct KeyStore {
    repository: Arc<dyn KeyRepository>,
    policy: KeyPolicy,
}

impl KeyStore {
    /// Creates a new KeyStore
    pub fn new(repository: Arc<dyn KeyRepository>, policy: KeyPolicy) -> Self {
        Self { repository, policy }
    }

    /// Generates and persists a fresh RSA-2048 key pair
    ///
    /// Both halves are marked active with the policy's expiry (1 year by
    /// default). Key generation is CPU-bound and runs synchronously.
    pub async fn generate_key_pair(&self, label: impl Into<String>) -> Result<GeneratedKeyPair> {
        let start = Instant::now();
        let label = label.into();

        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| Error::Crypto(format!("RSA key generation failed: {}", e)))?;
        let public = RsaPublicKey::from(&private);

        let public_der = public
            .to_public_key_der()
            .map_err(|e| Error::Crypto(format!("Public key encoding failed: {}", e)))?;
        let private_der = private
            .to_pkcs8_der()
            .map_err(|e| Error::Crypto(format!("Private key encoding failed: {}", e)))?;

        let pair_id = Uuid::new_v4();
        let created_at = Utc::now();
        let expires_at = created_at
            + Duration::from_std(self.policy.key_expiry).unwrap_or_else(|_| Duration::zero());

        let public_record = KeyRecord {
            id: Uuid::new_v4(),
            pair_id,
            kind: KeyKind::AsymPublic,
            material: public_der.as_bytes().to_vec(),
            created_at,
            expires_at,
            active: true,
            label: label.clone(),
        };
        let private_record = KeyRecord {
            id: Uuid::new_v4(),
            pair_id,
            kind: KeyKind::AsymPrivate,
            material: private_der.as_bytes().to_vec(),
            created_at,
            expires_at,
            active: true,
            label,
        };

        self.repository.insert(&public_record).await?;
        self.repository.insert(&private_record).await?;

        counter!("vault.keys.generated", 1);
        histogram!("vault.keys.generate.time", start.elapsed());
        info!(
            "generated key pair {} (public {}, private {})",
            pair_id, public_record.id, private_record.id
        );

        Ok(GeneratedKeyPair {
            public: public_record,
            private: private_record,
        })
    }

    /// Returns the active public key for new encryptions
    ///
    /// Selection is the most-recently-created active public row. Absence is
    /// a hard failure; callers must have generated keys beforehand.
    pub async fn active_public_key(&self) -> Result<PublicKeyHandle> {
        let record = self
            .repository
            .find_latest_active(KeyKind::AsymPublic)
            .await?
            .ok_or_else(|| Error::NoActiveKey("no active RSA public key found".to_string()))?;

        let key = RsaPublicKey::from_public_key_der(&record.material)
            .map_err(|e| Error::Crypto(format!("Stored public key unreadable: {}", e)))?;

        Ok(PublicKeyHandle {
            id: record.id,
            pair_id: record.pair_id,
            key,
        })
    }

    /// Returns the active private key for signing
    pub async fn active_private_key(&self) -> Result<PrivateKeyHandle> {
        let record = self
            .repository
            .find_latest_active(KeyKind::AsymPrivate)
            .await?
            .ok_or_else(|| Error::NoActiveKey("no active RSA private key found".to_string()))?;

        let key = RsaPrivateKey::from_pkcs8_der(&record.material)
            .map_err(|e| Error::Crypto(format!("Stored private key unreadable: {}", e)))?;

        Ok(PrivateKeyHandle {
            id: record.id,
            pair_id: record.pair_id,
            key,
        })
    }

    /// Returns a historical key record by id, active or not
    pub async fn key_by_id(&self, id: Uuid) -> Result<KeyRecord> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::KeyNotFound(format!("key {} does not exist", id)))
    }

    /// Resolves the key pair for a recorded public key id
    ///
    /// Used at decryption time: the file's metadata cites the public key
    /// its file key was wrapped under, which may no longer be the active
    /// generation. The paired private half performs the unwrap and the
    /// public half verifies the envelope signature.
    pub async fn pair_for_public(&self, public_key_id: Uuid) -> Result<(PublicKeyHandle, PrivateKeyHandle)> {
        let record = self.key_by_id(public_key_id).await?;
        if record.kind != KeyKind::AsymPublic {
            return Err(Error::InvalidArgument(format!(
                "key {} is not a public key",
                public_key_id
            )));
        }

        let public = RsaPublicKey::from_public_key_der(&record.material)
            .map_err(|e| Error::Crypto(format!("Stored public key unreadable: {}", e)))?;

        let private_record = self
            .repository
            .find_private_by_pair(record.pair_id)
            .await?
            .ok_or_else(|| {
                Error::KeyNotFound(format!(
                    "private half of pair {} does not exist",
                    record.pair_id
                ))
            })?;

        let private = RsaPrivateKey::from_pkcs8_der(&private_record.material)
            .map_err(|e| Error::Crypto(format!("Stored private key unreadable: {}", e)))?;

        Ok((
            PublicKeyHandle {
                id: record.id,
                pair_id: record.pair_id,
                key: public,
            },
            PrivateKeyHandle {
                id: private_record.id,
                pair_id: private_record.pair_id,
                key: private,
            },
        ))
    }

    /// Rotates the wrapping keys
    ///
    /// Generates a fresh pair first; if generation fails the rotation
    /// aborts with no other effect. Active keys created before the
    /// retention cutoff (30 days by default) are then deactivated one by
    /// one; a failure on one key does not abort the others.
    pub async fn rotate_keys(&self) -> Result<RotationResult> {
        let pair = self.generate_key_pair("rotation").await?;

        let cutoff = Utc::now()
            - Duration::from_std(self.policy.rotation_retention).unwrap_or_else(|_| Duration::zero());
        let stale = self.repository.find_active_created_before(cutoff).await?;

        let mut deactivated = 0;
        let mut failed = 0;
        for record in stale {
            // The fresh pair is never stale, but guard against clock skew
            if record.pair_id == pair.public.pair_id {
                continue;
            }
            match self.repository.set_active(record.id, false).await {
                Ok(true) => deactivated += 1,
                Ok(false) => {
                    warn!("stale key {} vanished during rotation", record.id);
                    failed += 1;
                }
                Err(e) => {
                    warn!("failed to deactivate key {}: {}", record.id, e);
                    failed += 1;
                }
            }
        }

        counter!("vault.keys.rotated", 1);
        info!(
            "key rotation complete: {} deactivated, {} failed",
            deactivated, failed
        );

        Ok(RotationResult { deactivated, failed })
    }

    /// Marks a single key inactive immediately
    pub async fn revoke_key(&self, id: Uuid) -> Result<()> {
        let found = self.repository.set_active(id, false).await?;
        if !found {
            return Err(Error::KeyNotFound(format!("key {} does not exist", id)));
        }

        info!("revoked key {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryKeyRepository;
    use std::time::Duration as StdDuration;

    fn store_with(policy: KeyPolicy) -> KeyStore {
        KeyStore::new(Arc::new(InMemoryKeyRepository::new()), policy)
    }

    #[tokio::test]
    async fn test_generate_then_active_lookup() {
        let store = store_with(KeyPolicy::new());

        let pair = store.generate_key_pair("initial").await.expect("generate");
        assert_eq!(pair.public.kind, KeyKind::AsymPublic);
        assert_eq!(pair.private.kind, KeyKind::AsymPrivate);
        assert_eq!(pair.public.pair_id, pair.private.pair_id);
        assert!(pair.public.expires_at > pair.public.created_at);

        let public = store.active_public_key().await.expect("active public");
        assert_eq!(public.id, pair.public.id);
        let private = store.active_private_key().await.expect("active private");
        assert_eq!(private.id, pair.private.id);
    }

    #[tokio::test]
    async fn test_no_active_key_is_hard_failure() {
        let store = store_with(KeyPolicy::new());

        let err = store.active_public_key().await.expect_err("no keys yet");
        match err {
            Error::NoActiveKey(msg) => assert!(msg.contains("no active RSA public key found")),
            other => panic!("expected NoActiveKey, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_active_selection_prefers_most_recent() {
        let repository = Arc::new(InMemoryKeyRepository::new());
        let store = KeyStore::new(repository.clone(), KeyPolicy::new());

        let older = store.generate_key_pair("older").await.expect("generate");
        let newer = store.generate_key_pair("newer").await.expect("generate");

        // Force a clear ordering regardless of generation timing
        repository
            .backdate(older.public.id, Utc::now() - Duration::hours(2))
            .await;
        repository
            .backdate(older.private.id, Utc::now() - Duration::hours(2))
            .await;

        let active = store.active_public_key().await.expect("active public");
        assert_eq!(active.id, newer.public.id);
    }

    #[tokio::test]
    async fn test_rotation_deactivates_stale_keys() {
        let repository = Arc::new(InMemoryKeyRepository::new());
        let policy = KeyPolicy::new().with_rotation_retention(StdDuration::from_secs(60 * 60));
        let store = KeyStore::new(repository.clone(), policy);

        let old = store.generate_key_pair("old").await.expect("generate");
        repository
            .backdate(old.public.id, Utc::now() - Duration::days(31))
            .await;
        repository
            .backdate(old.private.id, Utc::now() - Duration::days(31))
            .await;

        let result = store.rotate_keys().await.expect("rotate");
        assert_eq!(result, RotationResult { deactivated: 2, failed: 0 });

        // Old keys are deactivated, not deleted
        let record = store.key_by_id(old.public.id).await.expect("still present");
        assert!(!record.active);

        // The fresh pair is now active
        let active = store.active_public_key().await.expect("active public");
        assert_ne!(active.id, old.public.id);
    }

    #[tokio::test]
    async fn test_decryption_pair_resolves_after_rotation() {
        let repository = Arc::new(InMemoryKeyRepository::new());
        let store = KeyStore::new(repository.clone(), KeyPolicy::new());

        let old = store.generate_key_pair("old").await.expect("generate");
        store.revoke_key(old.public.id).await.expect("revoke");

        let (public, private) = store
            .pair_for_public(old.public.id)
            .await
            .expect("inactive keys remain resolvable");
        assert_eq!(public.id, old.public.id);
        assert_eq!(private.pair_id, old.public.pair_id);
    }

    #[tokio::test]
    async fn test_revoke_unknown_key() {
        let store = store_with(KeyPolicy::new());

        let err = store.revoke_key(Uuid::new_v4()).await.expect_err("unknown id");
        assert!(matches!(err, Error::KeyNotFound(_)));
    }
}
