// # Domain Store Implementations
//
// Persistence backends for the domain registry.

pub mod file;
pub mod memory;

pub use file::FileDomainStore;
pub use memory::MemoryDomainStore;
