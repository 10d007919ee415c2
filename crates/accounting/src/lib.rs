//! Multi-currency double-entry posting core.
//!
//! Pure domain logic only: no IO, no persistence concerns. Everything a
//! posting needs arrives through a [`PostingContext`].

pub mod account;
pub mod allocation;
pub mod balance;
pub mod builder;
pub mod context;
pub mod currency;
pub mod error;
pub mod journal;
pub mod resolver;
pub mod settings;

#[cfg(test)]
mod testing;

pub use account::{Account, AccountType, ChartOfAccounts};
pub use allocation::{
    Allocation, Assignee, Booking, BookingItem, CommissionLeg, CommissionRule, CommissionType,
    NetLiability, ServiceType, SettlementInput, allocate, rule_for,
};
pub use balance::{AccountBalance, BalanceOptions, TrialBalance, TrialBalanceRow, balance, trial_balance};
pub use builder::{
    CashMovement, DirectPurchase, EntryHeader, FeeRecognition, JournalEntryBuilder, Posting,
    PostingEvent, PostingPreview, PostingRequest, SettlementPosting, Transfer, WalletCredit,
    WalletKind, validate_lines,
};
pub use context::PostingContext;
pub use currency::{Currency, ExchangeRate, RateSnapshot, round2, to_base, to_native};
pub use error::{PostingError, PostingResult};
pub use journal::{
    BALANCE_TOLERANCE, EntryStatus, JournalEntry, JournalEntryLine, LINE_EPSILON, Side,
};
pub use resolver::{AccountResolver, ResolutionRequest, ResolutionStep};
pub use settings::{
    AccountOverrides, AccountRole, AccountRoleMapping, PostingSettings, RoleRule, RuleTable,
};
