// # Memory Domain Store
//
// In-memory implementation of DomainStore.
//
// ## Crash Behavior
//
// - All domains are lost on restart
// - Intended for tests and embedders that rebuild configuration at boot

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::Domain;
use crate::traits::DomainStore;

/// In-memory domain store
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryDomainStore {
    inner: Arc<RwLock<HashMap<String, Domain>>>,
}

impl MemoryDomainStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `domains`
    pub fn with_domains(domains: impl IntoIterator<Item = Domain>) -> Self {
        let map = domains.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of stored domains
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl DomainStore for MemoryDomainStore {
    async fn load_all(&self) -> Result<Vec<Domain>, Error> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn put(&self, domain: &Domain) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(domain.id.clone(), domain.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}
