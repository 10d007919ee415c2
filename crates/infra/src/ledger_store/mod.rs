//! Tenant-scoped document store for the posting engine.
//!
//! Documents are read one at a time and written through an atomic
//! [`WriteBatch`]: either every operation in the batch applies or none does.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{LedgerStore, StoreError, Versioned, WriteBatch, WriteOp};
