use thiserror::Error;

use ledgerflow_core::{DomainError, WalletTransactionId};

use crate::transaction::WalletStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The transaction left PENDING (possibly through a concurrent approver).
    #[error("wallet transaction {id} has already been processed (status: {status})")]
    AlreadyProcessed {
        id: WalletTransactionId,
        status: WalletStatus,
    },

    #[error("a rejection reason is required")]
    MissingRejectionReason,

    #[error(transparent)]
    Domain(#[from] DomainError),
}
