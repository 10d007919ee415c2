//! Persisted journal entry shapes.
//!
//! Entries are append-only: once written they are never edited, only offset by
//! a reversal entry.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::Zero;
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, BranchId, JournalEntryId, TenantId};

use crate::currency::{Currency, ExchangeRate};

/// Maximum base-currency difference between debits and credits.
pub const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Lines whose base value is below this are dropped before validation.
pub const LINE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
}

/// One line of a journal entry.
///
/// `debit`/`credit` are base-currency amounts. The `original_*` fields mirror
/// them in the transaction's native currency; legacy lines may lack the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub original_currency: Option<Currency>,
    pub original_exchange_rate: Option<ExchangeRate>,
    pub original_debit: Option<Decimal>,
    pub original_credit: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

impl JournalEntryLine {
    /// Signed base delta (debit positive).
    pub fn base_delta(&self) -> Decimal {
        self.debit - self.credit
    }

    /// Signed native delta from the mirror, if the line carries one.
    pub fn native_delta(&self) -> Option<Decimal> {
        match (self.original_debit, self.original_credit) {
            (None, None) => None,
            (d, c) => Some(d.unwrap_or_default() - c.unwrap_or_default()),
        }
    }

    pub fn side(&self) -> Side {
        if self.debit >= self.credit { Side::Debit } else { Side::Credit }
    }

    fn reversed(&self) -> Self {
        Self {
            account_id: self.account_id,
            debit: self.credit,
            credit: self.debit,
            original_currency: self.original_currency.clone(),
            original_exchange_rate: self.original_exchange_rate,
            original_debit: self.original_credit,
            original_credit: self.original_debit,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub branch_id: Option<BranchId>,
    /// The transaction's native currency.
    pub currency: Currency,
    /// Native → base rate in effect at posting time.
    pub exchange_rate: ExchangeRate,
    /// Native-currency total of the originating event.
    pub original_total: Decimal,
    pub lines: Vec<JournalEntryLine>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub related_document_id: Option<String>,
    #[serde(default)]
    pub reversal_of: Option<JournalEntryId>,
}

impl JournalEntry {
    /// (total debits, total credits) in base currency.
    pub fn totals(&self) -> (Decimal, Decimal) {
        self.lines.iter().fold((Decimal::zero(), Decimal::zero()), |(d, c), l| {
            (d + l.debit, c + l.credit)
        })
    }

    pub fn is_balanced(&self) -> bool {
        let (debit, credit) = self.totals();
        (debit - credit).abs() < BALANCE_TOLERANCE
    }

    pub fn is_posted(&self) -> bool {
        self.status == EntryStatus::Posted
    }

    /// Mirror entry that cancels this one.
    pub fn reversal(
        &self,
        id: JournalEntryId,
        occurred_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> JournalEntry {
        JournalEntry {
            id,
            tenant_id: self.tenant_id,
            date: occurred_at.date_naive(),
            description: reason.into(),
            reference: format!("REV-{}", self.reference),
            branch_id: self.branch_id,
            currency: self.currency.clone(),
            exchange_rate: self.exchange_rate,
            original_total: self.original_total,
            lines: self.lines.iter().map(JournalEntryLine::reversed).collect(),
            status: EntryStatus::Posted,
            created_at: occurred_at,
            related_document_id: self.related_document_id.clone(),
            reversal_of: Some(self.id),
        }
    }
}
