// # Domain Store Trait
//
// Persistence backend behind the `DomainRegistry`.
//
// The registry keeps the authoritative in-memory view and enforces every
// invariant; a store only has to durably hold what it is given.
//
// ## Implementations
//
// - `MemoryDomainStore`: tests and embedded use
// - `FileDomainStore`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;

use crate::model::Domain;

/// Trait for domain persistence backends
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Load every stored domain
    async fn load_all(&self) -> Result<Vec<Domain>, crate::Error>;

    /// Insert or replace a domain by id
    async fn put(&self, domain: &Domain) -> Result<(), crate::Error>;

    /// Remove a domain by id (no-op if absent)
    async fn remove(&self, id: &str) -> Result<(), crate::Error>;

    /// Flush pending writes
    ///
    /// Implementations that write through on every call can rely on the default.
    async fn flush(&self) -> Result<(), crate::Error> {
        Ok(())
    }
}
