// # Credential Vault
//
// Stores each domain's provider credential encrypted at rest.
//
// ## Lifetime of plaintext
//
// `get` decrypts into a fresh `Credential` owned by the caller. The
// orchestrator holds it for exactly one provider call and drops it; the vault
// itself keeps only sealed entries.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "salt": "base64",
//   "iterations": 600000,
//   "check": { "nonce": "...", "ciphertext": "..." },
//   "entries": { "<domain id>": { "nonce": "...", "ciphertext": "..." } }
// }
// ```
//
// `check` seals a fixed marker so a wrong secret is detected at open time
// instead of at the first provider call.

mod credential;
mod crypto;

pub use credential::Credential;
pub use crypto::VaultKey;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::persist;
use crate::{Error, Result};
use crypto::SealedEntry;

const VAULT_FILE_VERSION: &str = "1.0";
const CHECK_AAD: &str = "ddns-vault-check";
const CHECK_MARKER: &[u8] = b"ddns-vault";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct VaultFileFormat {
    version: String,
    salt: String,
    iterations: u32,
    check: SealedEntry,
    entries: BTreeMap<String, SealedEntry>,
}

#[derive(Debug)]
struct Backing {
    path: PathBuf,
    salt: String,
    iterations: u32,
    check: SealedEntry,
}

/// Encrypted credential storage keyed by domain id
#[derive(Debug)]
pub struct CredentialVault {
    key: VaultKey,
    backing: Option<Backing>,
    entries: Mutex<BTreeMap<String, SealedEntry>>,
}

impl CredentialVault {
    /// In-memory vault under the given key
    pub fn in_memory(key: VaultKey) -> Self {
        Self {
            key,
            backing: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// In-memory vault under a random key
    pub fn ephemeral() -> Self {
        Self::in_memory(VaultKey::generate())
    }

    /// Open or create a file-backed vault, deriving the key from `secret`
    pub async fn open<P: AsRef<Path>>(path: P, secret: &str) -> Result<Self> {
        Self::open_with_iterations(path, secret, crypto::PBKDF2_ITERATIONS).await
    }

    /// Like [`open`](Self::open) with an explicit PBKDF2 iteration count for new vaults
    ///
    /// Existing vaults always use the count stored in the file.
    pub async fn open_with_iterations<P: AsRef<Path>>(
        path: P,
        secret: &str,
        iterations: u32,
    ) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::config("Vault secret cannot be empty"));
        }

        let path = path.as_ref().to_path_buf();
        persist::ensure_parent(&path).await?;

        match persist::load_with_recovery::<VaultFileFormat>(&path).await? {
            Some(file) => {
                if file.version != VAULT_FILE_VERSION {
                    tracing::warn!(
                        "Vault file version mismatch: expected {}, got {}",
                        VAULT_FILE_VERSION,
                        file.version
                    );
                }
                let salt = crypto::decode_salt(&file.salt)?;
                let key = derive_key(secret, salt, file.iterations).await?;
                if crypto::open(&key, CHECK_AAD, &file.check)? != CHECK_MARKER {
                    return Err(Error::credential("Vault check marker mismatch"));
                }

                tracing::debug!("Opened vault {} with {} entries", path.display(), file.entries.len());
                Ok(Self {
                    key,
                    backing: Some(Backing {
                        path,
                        salt: file.salt,
                        iterations: file.iterations,
                        check: file.check,
                    }),
                    entries: Mutex::new(file.entries),
                })
            }
            None => {
                let salt = crypto::random_salt();
                let key = derive_key(secret, salt.to_vec(), iterations).await?;
                let check = crypto::seal(&key, CHECK_AAD, CHECK_MARKER)?;
                let vault = Self {
                    key,
                    backing: Some(Backing {
                        path,
                        salt: crypto::encode_salt(&salt),
                        iterations,
                        check,
                    }),
                    entries: Mutex::new(BTreeMap::new()),
                };
                vault.write(&BTreeMap::new()).await?;
                tracing::info!("Created new credential vault");
                Ok(vault)
            }
        }
    }

    /// Encrypt and store the credential for `domain_id`, replacing any previous one
    pub async fn put(&self, domain_id: &str, credential: &Credential) -> Result<()> {
        let plaintext = serde_json::to_vec(credential)?;
        let sealed = crypto::seal(&self.key, domain_id, &plaintext)?;

        let mut guard = self.entries.lock().await;
        let previous = guard.insert(domain_id.to_string(), sealed);
        if let Err(e) = self.write(&guard).await {
            // Memory must keep matching the file
            match previous {
                Some(entry) => guard.insert(domain_id.to_string(), entry),
                None => guard.remove(domain_id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Decrypt the credential for `domain_id`
    pub async fn get(&self, domain_id: &str) -> Result<Credential> {
        let sealed = {
            let guard = self.entries.lock().await;
            guard
                .get(domain_id)
                .cloned()
                .ok_or_else(|| Error::credential(format!("No credential stored for domain {}", domain_id)))?
        };

        let plaintext = crypto::open(&self.key, domain_id, &sealed)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| Error::credential(format!("Stored credential is malformed: {}", e)))
    }

    /// Remove the credential for `domain_id` (no-op if absent)
    pub async fn delete(&self, domain_id: &str) -> Result<()> {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.remove(domain_id) {
            if let Err(e) = self.write(&guard).await {
                guard.insert(domain_id.to_string(), entry);
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn contains(&self, domain_id: &str) -> bool {
        self.entries.lock().await.contains_key(domain_id)
    }

    async fn write(&self, entries: &BTreeMap<String, SealedEntry>) -> Result<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let file = VaultFileFormat {
            version: VAULT_FILE_VERSION.to_string(),
            salt: backing.salt.clone(),
            iterations: backing.iterations,
            check: backing.check.clone(),
            entries: entries.clone(),
        };
        persist::write_atomic(&backing.path, &file).await
    }
}

/// Derive the vault key on the blocking pool
///
/// PBKDF2 at the default iteration count takes long enough to stall a
/// runtime worker.
async fn derive_key(secret: &str, salt: Vec<u8>, iterations: u32) -> Result<VaultKey> {
    let secret = secret.to_string();
    tokio::task::spawn_blocking(move || VaultKey::derive_with_iterations(&secret, &salt, iterations))
        .await
        .map_err(|e| Error::credential(format!("Key derivation task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FAST: u32 = 1_000;

    fn cred() -> Credential {
        Credential::Cloudflare {
            api_token: "cf-token-123".into(),
            account_email: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let vault = CredentialVault::ephemeral();
        vault.put("d1", &cred()).await.unwrap();
        assert_eq!(vault.get("d1").await.unwrap(), cred());
        vault.delete("d1").await.unwrap();
        assert!(vault.get("d1").await.is_err());
        assert!(!vault.contains("d1").await);
    }

    #[tokio::test]
    async fn test_file_vault_never_writes_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let vault = CredentialVault::open_with_iterations(&path, "s3cret", FAST).await.unwrap();
        vault.put("d1", &cred()).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("cf-token-123"));

        let reopened = CredentialVault::open_with_iterations(&path, "s3cret", FAST).await.unwrap();
        assert_eq!(reopened.get("d1").await.unwrap(), cred());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected_at_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");
        CredentialVault::open_with_iterations(&path, "right", FAST).await.unwrap();
        let err = CredentialVault::open_with_iterations(&path, "wrong", FAST).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CredentialError);
    }

    #[tokio::test]
    async fn test_entry_cannot_be_replayed_under_other_domain() {
        let vault = CredentialVault::ephemeral();
        vault.put("d1", &cred()).await.unwrap();
        {
            let mut guard = vault.entries.lock().await;
            let sealed = guard.get("d1").cloned().unwrap();
            guard.insert("d2".into(), sealed);
        }
        assert!(vault.get("d2").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_credential() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let vault = CredentialVault::open_with_iterations(data.join("vault.json"), "s3cret", FAST)
            .await
            .unwrap();
        vault.put("d1", &cred()).await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();

        let replacement = Credential::Cloudflare {
            api_token: "cf-token-456".into(),
            account_email: None,
        };
        assert!(vault.put("d1", &replacement).await.is_err());
        assert!(vault.put("d2", &replacement).await.is_err());
        assert!(vault.delete("d1").await.is_err());

        assert_eq!(vault.get("d1").await.unwrap(), cred());
        assert!(!vault.contains("d2").await);
    }
}
