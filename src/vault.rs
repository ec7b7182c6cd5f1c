//! Reversible encryption of the academic-affairs password.
//!
//! Ciphertexts are AES-256-GCM, stored as URL-safe base64 of
//! `nonce || ciphertext || tag`. The key is either the configured secret
//! itself (base64 of exactly 32 bytes) or derived from it with
//! PBKDF2-HMAC-SHA256 over a fixed salt, so the same secret always yields the
//! same key across restarts.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use sha2::Sha256;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

const KDF_SALT: &[u8] = b"stable_salt_for_jwxt";
const KDF_ROUNDS: u32 = 100_000;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VaultError {
    /// No secret configured.
    MissingKey,
    /// Input is not a ciphertext this vault produced.
    Malformed(String),
    /// Authentication tag did not verify: wrong key or tampered data.
    Rejected,
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::MissingKey => write!(f, "no encryption key configured"),
            VaultError::Malformed(msg) => write!(f, "malformed ciphertext: {}", msg),
            VaultError::Rejected => write!(f, "decryption failed (wrong key or corrupted data)"),
        }
    }
}

impl std::error::Error for VaultError {}

pub struct Vault {
    cipher: Aes256Gcm,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    pub fn new(secret: &str) -> Result<Self, VaultError> {
        if secret.is_empty() {
            return Err(VaultError::MissingKey);
        }
        let key = match native_key(secret) {
            Some(key) => key,
            None => {
                log::debug!("Encryption key is not a raw 256-bit key, deriving one with PBKDF2");
                derive_key(secret)
            }
        };
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::Malformed(format!("invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Rejected)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(sealed))
    }

    /// Never panics; every bad input comes back as a `VaultError`.
    pub fn decrypt(&self, token: &str) -> Result<String, VaultError> {
        let sealed = URL_SAFE
            .decode(token.trim())
            .map_err(|e| VaultError::Malformed(e.to_string()))?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::Malformed(format!(
                "expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                sealed.len()
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Rejected)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Malformed("plaintext is not UTF-8".into()))
    }
}

fn native_key(secret: &str) -> Option<[u8; KEY_SIZE]> {
    let bytes = STANDARD
        .decode(secret)
        .or_else(|_| URL_SAFE.decode(secret))
        .ok()?;
    bytes.try_into().ok()
}

fn derive_key(secret: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_key() -> String {
        URL_SAFE.encode([7u8; KEY_SIZE])
    }

    #[test]
    fn round_trips_assorted_strings() {
        let vault = Vault::new(&raw_key()).unwrap();
        for plaintext in ["", "hunter2", "密码 with spaces", &"x".repeat(4096)] {
            let sealed = vault.encrypt(plaintext).unwrap();
            assert_ne!(sealed, plaintext);
            assert_eq!(vault.decrypt(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn passphrase_keys_are_derived_deterministically() {
        let first = Vault::new("not a base64 key at all").unwrap();
        let second = Vault::new("not a base64 key at all").unwrap();
        let sealed = first.encrypt("secret").unwrap();
        assert_eq!(second.decrypt(&sealed).unwrap(), "secret");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let vault = Vault::new(&raw_key()).unwrap();
        assert_ne!(vault.encrypt("same").unwrap(), vault.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = Vault::new(&raw_key()).unwrap().encrypt("secret").unwrap();
        let other = Vault::new("another passphrase").unwrap();
        assert_eq!(other.decrypt(&sealed), Err(VaultError::Rejected));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let vault = Vault::new(&raw_key()).unwrap();
        let mut sealed = URL_SAFE.decode(vault.encrypt("secret").unwrap()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(vault.decrypt(&URL_SAFE.encode(sealed)), Err(VaultError::Rejected));
    }

    #[test]
    fn garbage_input_fails_closed() {
        let vault = Vault::new(&raw_key()).unwrap();
        assert!(matches!(vault.decrypt("%%%not base64%%%"), Err(VaultError::Malformed(_))));
        assert!(matches!(vault.decrypt("c2hvcnQ="), Err(VaultError::Malformed(_))));
        assert!(matches!(vault.decrypt(""), Err(VaultError::Malformed(_))));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert_eq!(Vault::new("").unwrap_err(), VaultError::MissingKey);
    }
}
