//! Storage implementations of the collaborator traits.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryDirectory, MemoryTaskCatalog, SessionRecord, StudentRecord};
