// # File Domain Store
//
// File-based implementation of DomainStore with crash recovery.
//
// Every mutation is written through immediately using the atomic
// write-then-rename scheme in `persist`.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "domains": {
//     "6f1c...": { "id": "6f1c...", "name": "example.com", "subdomain": "home", ... }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::Error;
use crate::model::Domain;
use crate::persist;
use crate::traits::DomainStore;

/// Domain file format version
const DOMAIN_FILE_VERSION: &str = "1.0";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct DomainFileFormat {
    version: String,
    domains: BTreeMap<String, Domain>,
}

/// File-backed domain store
///
/// # Example
///
/// ```rust,no_run
/// use ddns_core::store::FileDomainStore;
/// use ddns_core::traits::DomainStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileDomainStore::open("/var/lib/ddns/domains.json").await?;
///     println!("{} domains", store.load_all().await?.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileDomainStore {
    path: PathBuf,
    domains: Mutex<BTreeMap<String, Domain>>,
}

impl FileDomainStore {
    /// Open or create a domain file, recovering from backup if corrupted
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        persist::ensure_parent(&path).await?;

        let domains = match persist::load_with_recovery::<DomainFileFormat>(&path).await? {
            Some(file) => {
                if file.version != DOMAIN_FILE_VERSION {
                    tracing::warn!(
                        "Domain file version mismatch: expected {}, got {}. \
                        Attempting to load anyway.",
                        DOMAIN_FILE_VERSION,
                        file.version
                    );
                }
                tracing::debug!("Loaded {} domains from {}", file.domains.len(), path.display());
                file.domains
            }
            None => BTreeMap::new(),
        };

        Ok(Self {
            path,
            domains: Mutex::new(domains),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, domains: &BTreeMap<String, Domain>) -> Result<(), Error> {
        let file = DomainFileFormat {
            version: DOMAIN_FILE_VERSION.to_string(),
            domains: domains.clone(),
        };
        persist::write_atomic(&self.path, &file).await
    }
}

#[async_trait]
impl DomainStore for FileDomainStore {
    async fn load_all(&self) -> Result<Vec<Domain>, Error> {
        Ok(self.domains.lock().await.values().cloned().collect())
    }

    async fn put(&self, domain: &Domain) -> Result<(), Error> {
        // Lock held across the write so file writes are serialized
        let mut guard = self.domains.lock().await;
        guard.insert(domain.id.clone(), domain.clone());
        self.write(&guard).await
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        let mut guard = self.domains.lock().await;
        if guard.remove(id).is_some() {
            self.write(&guard).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let guard = self.domains.lock().await;
        self.write(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderKind, RecordType};
    use chrono::Utc;
    use tempfile::tempdir;

    fn domain(id: &str, ip: Option<&str>) -> Domain {
        let now = Utc::now();
        Domain {
            id: id.into(),
            name: "example.com".into(),
            subdomain: "home".into(),
            provider: ProviderKind::Aliyun,
            record_type: RecordType::A,
            target: None,
            ttl: None,
            current_ip: ip.map(str::to_string),
            last_updated: None,
            update_interval: 300,
            enabled: true,
            account: "acct".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.json");

        let store = FileDomainStore::open(&path).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        store.put(&domain("d1", Some("203.0.113.5"))).await.unwrap();
        store.put(&domain("d2", None)).await.unwrap();
        store.remove("d2").await.unwrap();
        assert!(path.exists());

        let reopened = FileDomainStore::open(&path).await.unwrap();
        let all = reopened.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].current_ip.as_deref(), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn test_file_store_recovers_from_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.json");

        let store = FileDomainStore::open(&path).await.unwrap();
        store.put(&domain("d1", Some("198.51.100.1"))).await.unwrap();
        store.put(&domain("d1", Some("198.51.100.2"))).await.unwrap();

        tokio::fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileDomainStore::open(&path).await.unwrap();
        let all = recovered.load_all().await.unwrap();
        assert_eq!(all[0].current_ip.as_deref(), Some("198.51.100.1"));
    }

    #[tokio::test]
    async fn test_memory_store_shares_state_between_clones() {
        let store = crate::store::MemoryDomainStore::new();
        let clone = store.clone();
        store.put(&domain("d1", None)).await.unwrap();
        assert_eq!(clone.len().await, 1);
        clone.remove("d1").await.unwrap();
        assert!(store.is_empty().await);
    }
}
