//! Registries
//!
//! - [`ProviderRegistry`]: maps each [`ProviderKind`] to its adapter
//! - [`DomainRegistry`]: the authoritative set of configured domains
//!
//! ## Registration
//!
//! Provider crates install their adapters at startup:
//!
//! ```rust,ignore
//! let providers = ProviderRegistry::new();
//! ddns_providers::register_all(&providers, &config)?;
//! ```

mod domains;

pub use domains::{DomainChange, DomainRegistry};

use crate::error::{Error, Result};
use crate::model::ProviderKind;
use crate::traits::DnsProvider;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Provider registry keyed by [`ProviderKind`]
///
/// The set of kinds is fixed; registration only decides which adapter
/// instance serves each kind (real adapters in production, fakes in tests).
///
/// ## Thread Safety
///
/// Interior mutability with `RwLock`, allowing concurrent lookups.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderKind, Arc<dyn DnsProvider>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter for its own [`DnsProvider::kind`], replacing any previous one
    pub fn register(&self, provider: Arc<dyn DnsProvider>) {
        let kind = provider.kind();
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, provider);
    }

    /// Look up the adapter for `kind`
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn DnsProvider>)`: The registered adapter
    /// - `Err(Error::Config)`: No adapter registered for `kind`
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn DnsProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("No adapter registered for provider: {}", kind)))
    }

    /// Whether an adapter is registered for `kind`
    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        ProviderKind::ALL
            .into_iter()
            .filter(|k| providers.contains_key(k))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}
