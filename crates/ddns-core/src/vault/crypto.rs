//! AES-256-GCM sealing for vault entries
//!
//! Keys are 32 bytes, nonces 12 bytes, salts 16 bytes. Each entry is sealed
//! with the domain id as associated data so a ciphertext cannot be moved
//! to another domain.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::Error;

pub(crate) const PBKDF2_ITERATIONS: u32 = 600_000;
pub(crate) const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const KEY_LENGTH: usize = 32;

/// Vault encryption key
#[derive(Clone)]
pub struct VaultKey([u8; KEY_LENGTH]);

impl VaultKey {
    /// Derive a key from a process secret and salt
    pub fn derive(secret: &str, salt: &[u8]) -> Self {
        Self::derive_with_iterations(secret, salt, PBKDF2_ITERATIONS)
    }

    pub fn derive_with_iterations(secret: &str, salt: &[u8], iterations: u32) -> Self {
        Self(pbkdf2_hmac_array::<Sha256, KEY_LENGTH>(
            secret.as_bytes(),
            salt,
            iterations,
        ))
    }

    /// Random key for vaults that live only as long as the process
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Result<Aes256Gcm, Error> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| Error::credential(format!("Failed to create cipher: {e}")))
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// One encrypted entry, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SealedEntry {
    pub nonce: String,
    pub ciphertext: String,
}

pub(crate) fn random_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::rng().fill_bytes(&mut salt);
    salt
}

pub(crate) fn seal(key: &VaultKey, aad: &str, plaintext: &[u8]) -> Result<SealedEntry, Error> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = key
        .cipher()?
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| Error::credential(format!("Encryption failed: {e}")))?;

    Ok(SealedEntry {
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

pub(crate) fn open(key: &VaultKey, aad: &str, entry: &SealedEntry) -> Result<Vec<u8>, Error> {
    let nonce_bytes = BASE64
        .decode(&entry.nonce)
        .map_err(|e| Error::credential(format!("Invalid nonce: {e}")))?;
    if nonce_bytes.len() != NONCE_LENGTH {
        return Err(Error::credential("Invalid nonce length"));
    }
    let ciphertext = BASE64
        .decode(&entry.ciphertext)
        .map_err(|e| Error::credential(format!("Invalid ciphertext: {e}")))?;

    key.cipher()?
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: ciphertext.as_ref(),
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| Error::credential("Decryption failed: wrong vault secret or corrupted entry"))
}

pub(crate) fn encode_salt(salt: &[u8]) -> String {
    BASE64.encode(salt)
}

pub(crate) fn decode_salt(salt: &str) -> Result<Vec<u8>, Error> {
    BASE64
        .decode(salt)
        .map_err(|e| Error::credential(format!("Invalid vault salt: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_binds_aad() {
        let key = VaultKey::generate();
        let sealed = seal(&key, "domain-1", b"secret").unwrap();
        assert_eq!(open(&key, "domain-1", &sealed).unwrap(), b"secret");
        assert!(open(&key, "domain-2", &sealed).is_err());
        assert!(open(&VaultKey::generate(), "domain-1", &sealed).is_err());
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = VaultKey::generate();
        let a = seal(&key, "d", b"same").unwrap();
        let b = seal(&key, "d", b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = [7u8; SALT_LENGTH];
        let a = VaultKey::derive_with_iterations("pw", &salt, 1000);
        let b = VaultKey::derive_with_iterations("pw", &salt, 1000);
        let sealed = seal(&a, "x", b"v").unwrap();
        assert_eq!(open(&b, "x", &sealed).unwrap(), b"v");
    }
}
