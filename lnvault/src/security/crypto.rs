//! Connector credential codec: Argon2id key derivation plus AES-256-GCM.
//!
//! Blob layout: `[12-byte nonce][ciphertext with 16-byte auth tag]`.
//!
//! The codec never looks inside the plaintext. Connector configs are
//! serialized by the caller (see [`crate::connector::ConnectorConfig`]) and
//! handed over as bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::KdfParams;
use crate::error::{LnVaultError, Result};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32; // 256-bit key for AES-256

/// A 256-bit key derived from `{password, salt}`, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for DerivedKey {}

/// Encrypts and decrypts connector configuration blobs.
///
/// One codec instance is shared by the session gate and every save path,
/// so a single password unlocks every account uniformly.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialCodec {
    params: KdfParams,
}

impl CredentialCodec {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive the symmetric key for `{password, salt}`.
    ///
    /// The salt string is hashed with SHA-256 before it reaches Argon2id,
    /// which requires at least 8 salt bytes. Same inputs always give the
    /// same key.
    pub fn derive_key(&self, password: &str, salt: &str) -> Result<DerivedKey> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| LnVaultError::Encryption(format!("Invalid Argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt_digest = Sha256::digest(salt.as_bytes());

        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(password.as_bytes(), &salt_digest, &mut key)
            .map_err(|e| LnVaultError::Encryption(format!("Key derivation failed: {}", e)))?;

        debug!("Derived {}-byte key", key.len());
        let derived = DerivedKey::from_bytes(key);
        key.zeroize();
        Ok(derived)
    }

    /// [`derive_key`](Self::derive_key) on tokio's blocking pool.
    ///
    /// Argon2id with the default parameters takes long enough to stall a
    /// runtime worker, so async callers go through here.
    pub async fn derive_key_async(&self, password: &str, salt: &str) -> Result<DerivedKey> {
        let codec = *self;
        let password = Zeroizing::new(password.to_owned());
        let salt = salt.to_owned();

        tokio::task::spawn_blocking(move || codec.derive_key(&password, &salt))
            .await
            .map_err(|e| LnVaultError::Encryption(format!("Key derivation task failed: {}", e)))?
    }

    pub fn encrypt(&self, plaintext: &[u8], password: &str, salt: &str) -> Result<Vec<u8>> {
        let key = self.derive_key(password, salt)?;
        Self::encrypt_with_key(&key, plaintext)
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Any authentication failure (wrong password, wrong salt, tampered or
    /// truncated blob) surfaces as [`LnVaultError::Auth`].
    pub fn decrypt(&self, ciphertext: &[u8], password: &str, salt: &str) -> Result<Vec<u8>> {
        let key = self.derive_key(password, salt)?;
        Self::decrypt_with_key(&key, ciphertext)
    }

    pub fn encrypt_with_key(key: &DerivedKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| LnVaultError::Encryption(format!("Invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| LnVaultError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut output = nonce_bytes.to_vec();
        output.extend(ciphertext);
        Ok(output)
    }

    pub fn decrypt_with_key(key: &DerivedKey, encrypted: &[u8]) -> Result<Vec<u8>> {
        if encrypted.len() < NONCE_SIZE + TAG_SIZE {
            return Err(LnVaultError::Auth("ciphertext too short".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| LnVaultError::Encryption(format!("Invalid key: {}", e)))?;

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        // Wrong key and tampered data are indistinguishable under GCM.
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| LnVaultError::Auth("invalid password".into()))
    }
}

#[cfg(test)]
pub(crate) fn test_codec() -> CredentialCodec {
    CredentialCodec::new(KdfParams::insecure_fast())
}
