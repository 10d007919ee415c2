//! Posting error taxonomy.

use rust_decimal::Decimal;
use thiserror::Error;

use ledgerflow_core::{AccountId, BookingId};

use crate::currency::Currency;
use crate::settings::AccountRole;

pub type PostingResult<T> = Result<T, PostingError>;

/// Every failure the posting core can raise.
///
/// All variants abort the posting as a whole. `AlreadyRecognized` is the one
/// the service layer turns into a successful no-op.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostingError {
    #[error("invalid exchange rate for {currency}: {reason}")]
    InvalidExchangeRate { currency: Currency, reason: String },

    #[error("no ledger account is configured for role `{role}` ({currency}); configure it in account settings")]
    UnconfiguredAccountRole { role: AccountRole, currency: Currency },

    #[error("entry is unbalanced: debits {debit} != credits {credit}")]
    UnbalancedEntry { debit: Decimal, credit: Decimal },

    #[error("entry has no lines above the posting threshold")]
    EmptyEntry,

    #[error("all items have already been recognized")]
    AlreadyRecognized,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("booking {booking} has {remaining} unrecognized items but {requested} were submitted")]
    ItemCountExceeded {
        booking: BookingId,
        requested: usize,
        remaining: usize,
    },

    #[error("account {0} does not exist in the chart of accounts")]
    UnknownAccount(AccountId),

    #[error("account {0} is a header account and cannot be posted to")]
    HeaderAccount(AccountId),

    #[error("booking {0} referenced by a settled item was not supplied")]
    UnknownBooking(BookingId),

    #[error("invalid chart of accounts: {0}")]
    InvalidChart(String),
}

impl PostingError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }
}
