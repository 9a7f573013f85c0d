use crate::envelope::{Envelope, FILE_KEY_SIZE, IV_SIZE, KDF_ITERATIONS, SALT_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit},
    Aes256Gcm, Key as AesKey, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;
use std::fmt;

// Maximum message size supported by GCM
// ((1 << 32) - 2) * AES block size
const GCM_MAX_DATA_SIZE: usize = ((1 << 32) - 2) * 16;

/// Pure encrypt/decrypt between plaintext streams and envelopes
///
/// The codec performs no I/O; callers persist envelopes through
/// [`crate::blobstore::BlobStore`] and record which public key id was used.
#[derive(Clone)]
pub struct EnvelopeCodec {
    master_passphrase: String,
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("master_passphrase", &"<redacted>")
            .finish()
    }
}

/// Derives the per-file key from the master passphrase, the file id, and a
/// random salt
///
/// The KDF salt is `file_id || salt`, binding the derived key to both the
/// global secret and the specific file; the derivation is reproducible from
/// those inputs alone, so the derived key itself is never stored.
fn derive_file_key(passphrase: &str, file_id: &str, salt: &[u8]) -> [u8; FILE_KEY_SIZE] {
    let mut kdf_salt = Vec::with_capacity(file_id.len() + salt.len());
    kdf_salt.extend_from_slice(file_id.as_bytes());
    kdf_salt.extend_from_slice(salt);

    let mut key = [0_u8; FILE_KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &kdf_salt, KDF_ITERATIONS, &mut key);
    key
}

impl EnvelopeCodec {
    /// Creates a codec bound to the vault's master passphrase
    pub fn new(master_passphrase: impl Into<String>) -> Self {
        Self {
            master_passphrase: master_passphrase.into(),
        }
    }

    /// Encrypts a plaintext into a signed envelope
    ///
    /// The wrapping key and the signing key must come from the same active
    /// generation; the caller records the wrapping key's id alongside the
    /// persisted envelope for later unwrap resolution.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        file_id: &str,
        wrapping_key: &RsaPublicKey,
        signing_key: &RsaPrivateKey,
    ) -> Result<Envelope> {
        if plaintext.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::Crypto("Data too large for GCM".into()));
        }

        let mut salt = [0_u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let mut file_key = derive_file_key(&self.master_passphrase, file_id, &salt);

        let mut iv = [0_u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&file_key));

        // Ciphertext comes back with the tag appended; the envelope keeps
        // the tag as its own field
        let mut ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| {
                file_key.zeroize();
                Error::Crypto(format!("Encryption failed: {}", e))
            })?;
        let auth_tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

        let wrapped_key = wrapping_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &file_key)
            .map_err(|e| {
                file_key.zeroize();
                Error::Crypto(format!("File key wrap failed: {}", e))
            })?;

        file_key.zeroize();

        let mut envelope = Envelope {
            iv: iv.to_vec(),
            salt: salt.to_vec(),
            auth_tag,
            wrapped_key,
            signature: Vec::new(),
            ciphertext,
        };

        let digest = Sha256::digest(envelope.signed_payload());
        envelope.signature = signing_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| Error::Crypto(format!("Envelope signing failed: {}", e)))?;

        Ok(envelope)
    }

    /// Verifies and decrypts an envelope back to plaintext
    ///
    /// Checks run strictly in order: signature, asymmetric unwrap,
    /// constant-time comparison against the independent KDF re-derivation,
    /// AEAD decryption. A failure at any step aborts; partial or unverified
    /// plaintext is never returned.
    pub fn decrypt(
        &self,
        envelope: &Envelope,
        unwrapping_key: &RsaPrivateKey,
        verifying_key: &RsaPublicKey,
        file_id: &str,
    ) -> Result<Vec<u8>> {
        envelope.check_field_sizes()?;

        let digest = Sha256::digest(envelope.signed_payload());
        verifying_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &envelope.signature)
            .map_err(|_| {
                Error::SignatureInvalid(format!(
                    "signature verification failed for file {}",
                    file_id
                ))
            })?;

        let mut unwrapped = unwrapping_key
            .decrypt(Oaep::new::<Sha256>(), &envelope.wrapped_key)
            .map_err(|_| Error::Crypto(format!("File key unwrap failed for file {}", file_id)))?;

        // Second, signature-independent tamper check: the unwrapped key must
        // equal the key re-derived from the passphrase, file id, and stored
        // salt. Catches a validly wrapped but substituted file key.
        let mut rederived = derive_file_key(&self.master_passphrase, file_id, &envelope.salt);
        let keys_match = unwrapped.len() == FILE_KEY_SIZE
            && bool::from(unwrapped.as_slice().ct_eq(&rederived));
        if !keys_match {
            unwrapped.zeroize();
            rederived.zeroize();
            return Err(Error::KeyMismatch(format!(
                "unwrapped key does not match derivation for file {}",
                file_id
            )));
        }
        rederived.zeroize();

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&unwrapped));

        let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&envelope.ciphertext);
        sealed.extend_from_slice(&envelope.auth_tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&envelope.iv), sealed.as_slice())
            .map_err(|_| {
                Error::Crypto(format!(
                    "AEAD authentication failed for file {}",
                    file_id
                ))
            });
        unwrapped.zeroize();
        let plaintext = plaintext?;

        // Degenerate envelope guard
        if plaintext.is_empty() {
            return Err(Error::EmptyContent);
        }

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RSA_KEY_BITS;

    fn test_key_pair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).expect("key generation");
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new("correct horse battery staple")
    }

    #[test]
    fn test_round_trip() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let plaintext = b"hello docs";
        let envelope = codec
            .encrypt(plaintext, "F1", &public, &private)
            .expect("encrypt");

        assert_eq!(envelope.iv.len(), IV_SIZE);
        assert_eq!(envelope.salt.len(), SALT_SIZE);
        assert_eq!(envelope.auth_tag.len(), TAG_SIZE);
        assert_eq!(envelope.wrapped_key.len(), RSA_KEY_BITS / 8);
        assert_eq!(envelope.signature.len(), RSA_KEY_BITS / 8);

        let decrypted = codec
            .decrypt(&envelope, &private, &public, "F1")
            .expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_round_trip_large_payload() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let plaintext: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let envelope = codec
            .encrypt(&plaintext, "big-file", &public, &private)
            .expect("encrypt");
        let decrypted = codec
            .decrypt(&envelope, &private, &public, "big-file")
            .expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_signature_detects_flips_in_signed_fields() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let envelope = codec
            .encrypt(b"sensitive filing", "F2", &public, &private)
            .expect("encrypt");

        for field in ["iv", "salt", "auth_tag", "ciphertext"] {
            let mut tampered = envelope.clone();
            match field {
                "iv" => tampered.iv[0] ^= 0x01,
                "salt" => tampered.salt[7] ^= 0x80,
                "auth_tag" => tampered.auth_tag[3] ^= 0x10,
                "ciphertext" => tampered.ciphertext[0] ^= 0xff,
                _ => unreachable!(),
            }

            let err = codec
                .decrypt(&tampered, &private, &public, "F2")
                .expect_err(field);
            assert!(
                matches!(err, Error::SignatureInvalid(_)),
                "flip in {} yielded {:?}",
                field,
                err
            );
        }
    }

    #[test]
    fn test_flipped_wrapped_key_is_integrity_failure() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let mut envelope = codec
            .encrypt(b"sensitive filing", "F3", &public, &private)
            .expect("encrypt");
        // The wrapped key is outside the signature; corruption here must
        // still fail before any AEAD decryption, via the OAEP unwrap.
        envelope.wrapped_key[10] ^= 0x01;

        let err = codec
            .decrypt(&envelope, &private, &public, "F3")
            .expect_err("tampered wrapped key");
        assert!(err.is_integrity(), "got {:?}", err);
    }

    #[test]
    fn test_substituted_wrapped_key_is_key_mismatch() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let mut envelope = codec
            .encrypt(b"sensitive filing", "F4", &public, &private)
            .expect("encrypt");

        // A different key, validly wrapped under the same public key: the
        // signature still verifies and the unwrap succeeds, so only the KDF
        // cross-check can catch it.
        let mut other_key = [0_u8; FILE_KEY_SIZE];
        OsRng.fill_bytes(&mut other_key);
        envelope.wrapped_key = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &other_key)
            .expect("wrap");

        let err = codec
            .decrypt(&envelope, &private, &public, "F4")
            .expect_err("substituted key");
        assert!(matches!(err, Error::KeyMismatch(_)), "got {:?}", err);
    }

    #[test]
    fn test_wrong_file_id_is_key_mismatch() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let envelope = codec
            .encrypt(b"sensitive filing", "F5", &public, &private)
            .expect("encrypt");
        let err = codec
            .decrypt(&envelope, &private, &public, "F6")
            .expect_err("wrong file id");
        assert!(matches!(err, Error::KeyMismatch(_)), "got {:?}", err);
    }

    #[test]
    fn test_empty_plaintext_rejected_on_decrypt() {
        let (private, public) = test_key_pair();
        let codec = codec();

        let envelope = codec
            .encrypt(b"", "F7", &public, &private)
            .expect("encrypt");
        let err = codec
            .decrypt(&envelope, &private, &public, "F7")
            .expect_err("empty content");
        assert!(matches!(err, Error::EmptyContent), "got {:?}", err);
    }
}
