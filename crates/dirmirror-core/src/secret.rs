//! At-rest protection for stored passwords
//!
//! Passwords in the configuration file may be stored encrypted with a
//! secret supplied at startup (password file or interactive prompt).
//!
//! ## Format
//!
//! ```text
//! base64( nonce[12] || AES-256-GCM(ciphertext || tag[16]) || salt[32] )
//! ```
//!
//! The key is derived from the secret with scrypt (N = 2^15, r = 8, p = 1,
//! 32-byte output) using the trailing salt.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use thiserror::Error;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Errors from encrypting or decrypting a stored secret
#[derive(Debug, Error)]
pub enum SecretError {
    /// The stored value is not valid base64
    #[error("encrypted value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The decoded value is too short to hold nonce, tag and salt
    #[error("encrypted value is truncated ({0} bytes)")]
    Truncated(usize),

    /// scrypt rejected the parameters
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Authentication failed: wrong secret or tampered data
    #[error("decryption failed (wrong secret or corrupted value)")]
    Cipher,
}

/// scrypt cost parameters paired with the cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretBox {
    log_n: u8,
    r: u32,
    p: u32,
}

impl Default for SecretBox {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl SecretBox {
    /// Uses non-default scrypt cost parameters
    ///
    /// Values encrypted with one cost can only be decrypted with the same cost.
    #[must_use]
    pub fn with_cost(log_n: u8, r: u32, p: u32) -> Self {
        Self { log_n, r, p }
    }

    fn derive_key(&self, secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN], SecretError> {
        let params = scrypt::Params::new(self.log_n, self.r, self.p, KEY_LEN)
            .map_err(|e| SecretError::KeyDerivation(e.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(secret, salt, &params, &mut key)
            .map_err(|e| SecretError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    /// Encrypts `data` and returns the base64 text form
    ///
    /// # Errors
    /// Returns an error if key derivation or encryption fails.
    pub fn encrypt_to_string(&self, secret: &str, data: &[u8]) -> Result<String, SecretError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(secret.as_bytes(), &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, data)
            .map_err(|_| SecretError::Cipher)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len() + SALT_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        out.extend_from_slice(&salt);

        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    /// Decrypts a value produced by [`SecretBox::encrypt_to_string`]
    ///
    /// # Errors
    /// Returns an error for malformed input or a wrong secret.
    pub fn decrypt_string(&self, secret: &str, text: &str) -> Result<Vec<u8>, SecretError> {
        let raw = base64::engine::general_purpose::STANDARD.decode(text.trim())?;
        if raw.len() < NONCE_LEN + TAG_LEN + SALT_LEN {
            return Err(SecretError::Truncated(raw.len()));
        }

        let (body, salt) = raw.split_at(raw.len() - SALT_LEN);
        let (nonce, sealed) = body.split_at(NONCE_LEN);

        let key = self.derive_key(secret.as_bytes(), salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SecretError::Cipher)
    }
}

/// Encrypts `data` with the default cost parameters
///
/// # Errors
/// See [`SecretBox::encrypt_to_string`].
pub fn encrypt_to_string(secret: &str, data: &[u8]) -> Result<String, SecretError> {
    SecretBox::default().encrypt_to_string(secret, data)
}

/// Decrypts `text` with the default cost parameters
///
/// # Errors
/// See [`SecretBox::decrypt_string`].
pub fn decrypt_string(secret: &str, text: &str) -> Result<Vec<u8>, SecretError> {
    SecretBox::default().decrypt_string(secret, text)
}
