//! `ledgerflow-core`: shared building blocks for the posting engine.
//!
//! Identifiers, the domain error model and the aggregate traits used by the
//! wallet state machine. Nothing in here performs IO.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AccountId, BookingId, BranchId, ItemId, JournalEntryId, TenantId, UserId,
    WalletTransactionId,
};
pub use value_object::ValueObject;
