//! Wallet transactions (settlement state machine).
//!
//! A wallet transaction is requested PENDING and is then either approved,
//! producing exactly one journal entry, or rejected without touching the
//! ledger. Domain logic only; the commit happens in `ledgerflow-infra`.

pub mod error;
pub mod transaction;

pub use error::WalletError;
pub use transaction::{
    ApproveWalletTransaction, FailWalletTransaction, NewWalletTransaction,
    RejectWalletTransaction, RequestWalletTransaction, SettlementDocuments, WalletStatus,
    WalletTransaction, WalletTransactionApproved, WalletTransactionCommand,
    WalletTransactionEvent, WalletTransactionFailed, WalletTransactionRejected,
    WalletTransactionRequested, WalletTransactionType,
};
