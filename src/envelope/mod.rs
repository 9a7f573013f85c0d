//! Signed-and-encrypted envelope for a single file
//!
//! An envelope carries everything needed to verify and decrypt one file's
//! ciphertext: the AEAD IV and tag, the KDF salt, the per-file key wrapped
//! under a versioned RSA public key, and a signature over the
//! wrapped-key-independent fields. Envelopes are immutable once written and
//! are always reconstructed whole; any single bit flip must be detectable
//! before the ciphertext is trusted.

pub mod codec;

/// On-disk format version tag
pub const FORMAT_VERSION: u32 = 1;

/// PBKDF2-HMAC-SHA256 iteration count
///
/// Fixed for interoperability with previously stored envelopes; do not
/// change without bumping [`FORMAT_VERSION`].
pub const KDF_ITERATIONS: u32 = 10_000;

/// Size of the derived per-file AES-256 key in bytes
pub const FILE_KEY_SIZE: usize = 32;

/// Size of the AES-GCM IV in bytes (96 bits)
pub const IV_SIZE: usize = 12;

/// Size of the KDF salt in bytes (256 bits)
pub const SALT_SIZE: usize = 32;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Modulus size for generated RSA key pairs
pub const RSA_KEY_BITS: usize = 2048;

/// The six-field envelope container
///
/// Field order here matches the on-disk serialization order in
/// [`crate::blobstore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// AES-GCM IV, [`IV_SIZE`] bytes
    pub iv: Vec<u8>,

    /// KDF salt, [`SALT_SIZE`] bytes
    pub salt: Vec<u8>,

    /// AES-GCM authentication tag, [`TAG_SIZE`] bytes
    pub auth_tag: Vec<u8>,

    /// Per-file key, OAEP-wrapped under the recorded public key
    pub wrapped_key: Vec<u8>,

    /// PKCS#1v1.5 signature over `iv || salt || auth_tag || ciphertext`
    pub signature: Vec<u8>,

    /// AES-GCM ciphertext, tag detached
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Returns the byte sequence covered by the signature
    ///
    /// The wrapped key is deliberately excluded so verification can happen
    /// before the asymmetric unwrap; a substituted wrapped key is instead
    /// caught by the KDF re-derivation check during decryption.
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(self.iv.len() + self.salt.len() + self.auth_tag.len() + self.ciphertext.len());
        payload.extend_from_slice(&self.iv);
        payload.extend_from_slice(&self.salt);
        payload.extend_from_slice(&self.auth_tag);
        payload.extend_from_slice(&self.ciphertext);
        payload
    }

    /// Checks the fixed-size fields against the format constants
    pub(crate) fn check_field_sizes(&self) -> crate::error::Result<()> {
        if self.iv.len() != IV_SIZE || self.salt.len() != SALT_SIZE || self.auth_tag.len() != TAG_SIZE {
            return Err(crate::error::Error::Crypto(format!(
                "envelope field sizes invalid (iv={}, salt={}, tag={})",
                self.iv.len(),
                self.salt.len(),
                self.auth_tag.len()
            )));
        }
        Ok(())
    }
}

pub use codec::EnvelopeCodec;
