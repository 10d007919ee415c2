//! Infrastructure layer: ledger store, settlement orchestration, config.

pub mod config;
pub mod ledger_store;
pub mod settlement;


pub use config::LedgerConfig;
pub use ledger_store::{InMemoryLedgerStore, LedgerStore, StoreError, Versioned, WriteBatch, WriteOp};
pub use settlement::{Approval, RecognitionOutcome, SettlementError, SettlementService};
