//! AES-256-GCM encryption of session private keys.
//!
//! Each master credential gets its own symmetric key, derived with
//! HKDF-SHA256 from the credential id and cached until shutdown. The
//! derivation input is the credential id only — the credential secret
//! itself never reaches the core.
//!
//! Ciphertext layout is `IV(12) ‖ ciphertext ‖ tag(16)`. Two legacy
//! storage formats are still accepted on the read path (see
//! [`CredentialVault::decrypt_encoded`]).

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use dashmap::DashMap;
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use zeroize::Zeroizing;

use veridex::error::CredentialError;

/// AES-GCM IV length in bytes.
const IV_LEN: usize = 12;

/// AES-GCM authentication-tag length in bytes.
const TAG_LEN: usize = 16;

/// HKDF salt binding derived keys to this vault.
const HKDF_SALT: &[u8] = b"veridex.credential-vault.v1";

/// HKDF info string for session-scalar encryption keys.
const HKDF_INFO: &[u8] = b"session-key-encryption";

/// A derived 256-bit symmetric key, zeroized when dropped.
pub struct SymmetricKey(Zeroizing<[u8; 32]>);

impl SymmetricKey {
    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Clone for SymmetricKey {
    fn clone(&self) -> Self {
        Self(Zeroizing::new(*self.0))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypts and decrypts session scalars under per-credential keys.
#[derive(Debug, Default)]
pub struct CredentialVault {
    keys: DashMap<String, SymmetricKey>,
}

impl CredentialVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives (or returns the cached) encryption key for a credential.
    ///
    /// Derivation is deterministic, so the same credential id always
    /// yields the same key across restarts.
    #[must_use]
    pub fn derive_key(&self, credential_id: &str) -> SymmetricKey {
        if let Some(key) = self.keys.get(credential_id) {
            return key.clone();
        }
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), credential_id.as_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        hkdf.expand(HKDF_INFO, &mut *okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        let key = SymmetricKey(okm);
        self.keys
            .insert(credential_id.to_owned(), key.clone());
        key
    }

    /// Encrypts a plaintext under `key` with a fresh random IV.
    ///
    /// The output is `IV ‖ ciphertext ‖ tag` and is opaque to callers.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Derivation`] if the cipher cannot be
    /// constructed from the key.
    pub fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CredentialError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CredentialError::Derivation(e.to_string()))?;
        let iv: [u8; IV_LEN] = rand::rng().random();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CredentialError::Derivation("encryption failed".into()))?;
        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts `IV ‖ ciphertext ‖ tag` data under `key`.
    ///
    /// Inputs no longer than the IV plus the tag cannot carry a valid
    /// message and are refused outright. Zero-length plaintext is
    /// permitted.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Malformed`] for impossible lengths and
    /// [`CredentialError::Tampered`] when the authentication tag does not
    /// match.
    pub fn decrypt(
        &self,
        data: &[u8],
        key: &SymmetricKey,
    ) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
        if data.len() < IV_LEN + TAG_LEN {
            return Err(CredentialError::Malformed(format!(
                "ciphertext too short: {} bytes",
                data.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CredentialError::Derivation(e.to_string()))?;
        let (iv, ciphertext) = data.split_at(IV_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CredentialError::Tampered)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Decrypts a stored `encryptedPrivateKey` string.
    ///
    /// Three formats are accepted:
    ///
    /// 1. A 66-character `0x`-prefixed hex string: a legacy *unencrypted*
    ///    32-byte scalar. Accepted with a warning; callers must plan
    ///    migration.
    /// 2. Any other `0x`-prefixed hex string: hex-encoded ciphertext.
    /// 3. Anything else: base64-encoded ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Malformed`] when the encoding is
    /// invalid and [`CredentialError::Tampered`] on tag mismatch.
    pub fn decrypt_encoded(
        &self,
        stored: &str,
        key: &SymmetricKey,
    ) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
        if let Some(hex_body) = stored.strip_prefix("0x") {
            let bytes = hex::decode(hex_body)
                .map_err(|e| CredentialError::Malformed(format!("invalid hex: {e}")))?;
            if stored.len() == 66 {
                tracing::warn!(
                    "session scalar stored unencrypted in legacy format; migrate this session"
                );
                return Ok(Zeroizing::new(bytes));
            }
            return self.decrypt(&bytes, key);
        }
        let bytes = veridex::encoding::Base64Bytes::from(stored.as_bytes())
            .decode()
            .map_err(|e| CredentialError::Malformed(format!("invalid base64: {e}")))?;
        self.decrypt(&bytes, key)
    }

    /// Drops every cached key, zeroizing each.
    pub fn shutdown(&self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic_and_distinct() {
        let vault = CredentialVault::new();
        let a1 = vault.derive_key("credential-a");
        let a2 = vault.derive_key("credential-a");
        let b = vault.derive_key("credential-b");
        assert_eq!(a1.as_bytes(), a2.as_bytes());
        assert_ne!(a1.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let ciphertext = vault.encrypt(b"scalar bytes", &key).unwrap();
        let plaintext = vault.decrypt(&ciphertext, &key).unwrap();
        assert_eq!(&*plaintext, b"scalar bytes");
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let a = vault.encrypt(b"same input", &key).unwrap();
        let b = vault.encrypt(b"same input", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_length_plaintext_is_permitted() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let ciphertext = vault.encrypt(b"", &key).unwrap();
        assert_eq!(ciphertext.len(), 12 + 16);
        let plaintext = vault.decrypt(&ciphertext, &key).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_is_detected() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let mut ciphertext = vault.encrypt(b"scalar bytes", &key).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(matches!(
            vault.decrypt(&ciphertext, &key),
            Err(CredentialError::Tampered)
        ));
    }

    #[test]
    fn test_wrong_key_is_tampered() {
        let vault = CredentialVault::new();
        let key_a = vault.derive_key("credential-a");
        let key_b = vault.derive_key("credential-b");
        let ciphertext = vault.encrypt(b"scalar bytes", &key_a).unwrap();
        assert!(matches!(
            vault.decrypt(&ciphertext, &key_b),
            Err(CredentialError::Tampered)
        ));
    }

    #[test]
    fn test_refuses_impossible_lengths() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        assert!(matches!(
            vault.decrypt(&[0u8; 27], &key),
            Err(CredentialError::Malformed(_))
        ));
    }

    #[test]
    fn test_legacy_unencrypted_scalar() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let stored = format!("0x{}", hex::encode([0x42u8; 32]));
        assert_eq!(stored.len(), 66);
        let plaintext = vault.decrypt_encoded(&stored, &key).unwrap();
        assert_eq!(&*plaintext, &[0x42u8; 32]);
    }

    #[test]
    fn test_hex_encoded_ciphertext() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let ciphertext = vault.encrypt(b"scalar bytes", &key).unwrap();
        let stored = format!("0x{}", hex::encode(&ciphertext));
        let plaintext = vault.decrypt_encoded(&stored, &key).unwrap();
        assert_eq!(&*plaintext, b"scalar bytes");
    }

    #[test]
    fn test_base64_encoded_ciphertext() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        let ciphertext = vault.encrypt(b"scalar bytes", &key).unwrap();
        let stored = veridex::encoding::Base64Bytes::encode(&ciphertext).to_string();
        let plaintext = vault.decrypt_encoded(&stored, &key).unwrap();
        assert_eq!(&*plaintext, b"scalar bytes");
    }

    #[test]
    fn test_bad_encoding_is_malformed() {
        let vault = CredentialVault::new();
        let key = vault.derive_key("credential-a");
        assert!(matches!(
            vault.decrypt_encoded("0xzz", &key),
            Err(CredentialError::Malformed(_))
        ));
        assert!(matches!(
            vault.decrypt_encoded("!!!", &key),
            Err(CredentialError::Malformed(_))
        ));
    }
}
