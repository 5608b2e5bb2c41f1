//! Core traits for the DDNS system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`IpSource`]: One strategy in the IP detection chain
//! - [`DnsProvider`]: Resolve and upsert records through a provider API
//! - [`DomainStore`]: Persistence backend for the domain registry
//! - [`LogSink`]: Receiver of structured engine events

pub mod dns_provider;
pub mod domain_store;
pub mod ip_source;
pub mod log_sink;

pub use dns_provider::{DnsProvider, ExistingRecord, RecordRef};
pub use domain_store::DomainStore;
pub use ip_source::IpSource;
pub use log_sink::{LogSink, NullLogSink};
