use crate::error::{Error, Result};

use std::path::PathBuf;
use std::time;

/// Default values for KeyPolicy
pub const DEFAULT_KEY_EXPIRY: time::Duration = time::Duration::from_secs(60 * 60 * 24 * 365); // 1 year
pub const DEFAULT_ROTATION_RETENTION: time::Duration = time::Duration::from_secs(60 * 60 * 24 * 30); // 30 days

/// Vault configuration, passed explicitly to constructors at startup
///
/// The master passphrase feeds per-file key derivation; the storage root is
/// the base directory of the on-disk blob layout. Neither is ever read from
/// ambient process state.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Master passphrase for per-file key derivation
    pub master_passphrase: String,

    /// Root directory for encrypted blobs
    pub storage_root: PathBuf,
}

impl VaultConfig {
    /// Creates a new VaultConfig
    ///
    /// Fails with a configuration error if the passphrase or the storage
    /// root is empty; encryption cannot proceed without either, and a late
    /// failure would be harder to attribute.
    pub fn new(master_passphrase: impl Into<String>, storage_root: impl Into<PathBuf>) -> Result<Self> {
        let master_passphrase = master_passphrase.into();
        if master_passphrase.is_empty() {
            return Err(Error::Config("master passphrase is not set".to_string()));
        }

        let storage_root = storage_root.into();
        if storage_root.as_os_str().is_empty() {
            return Err(Error::Config("storage root is not set".to_string()));
        }

        Ok(Self {
            master_passphrase,
            storage_root,
        })
    }
}

/// Policy for wrapping-key lifecycle management
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    /// Lifetime assigned to newly generated key pairs
    pub key_expiry: time::Duration,

    /// Age past which rotation deactivates a key
    pub rotation_retention: time::Duration,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            key_expiry: DEFAULT_KEY_EXPIRY,
            rotation_retention: DEFAULT_ROTATION_RETENTION,
        }
    }
}

impl KeyPolicy {
    /// Creates a new KeyPolicy with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expiry assigned to newly generated key pairs
    ///
    /// Default is 1 year.
    pub fn with_key_expiry(mut self, duration: time::Duration) -> Self {
        self.key_expiry = duration;
        self
    }

    /// Sets the retention window for rotation
    ///
    /// Keys created more than this long ago are deactivated by
    /// [`KeyStore::rotate_keys`](crate::keys::KeyStore::rotate_keys).
    /// Default is 30 days.
    pub fn with_rotation_retention(mut self, duration: time::Duration) -> Self {
        self.rotation_retention = duration;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_empty_passphrase() {
        let err = VaultConfig::new("", "/tmp/vault").expect_err("empty passphrase must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_rejects_empty_root() {
        let err = VaultConfig::new("secret", "").expect_err("empty root must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_policy_builders() {
        let policy = KeyPolicy::new()
            .with_key_expiry(time::Duration::from_secs(60))
            .with_rotation_retention(time::Duration::from_secs(30));
        assert_eq!(policy.key_expiry.as_secs(), 60);
        assert_eq!(policy.rotation_retention.as_secs(), 30);
    }
}
