//! Domain error model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rule violations raised by documents and their state machines.
///
/// Posting failures have their own taxonomy in `ledgerflow-accounting`; store
/// failures live with the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A command reached a document that was never created.
    #[error("{0} has not been created")]
    Uninitialized(&'static str),

    /// Stale version or duplicate creation.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn uninitialized(document: &'static str) -> Self {
        Self::Uninitialized(document)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }
}
