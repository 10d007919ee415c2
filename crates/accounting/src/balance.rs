//! Account balances from posted journal lines.
//!
//! The base balance is always exact. The native balance prefers each line's
//! native mirror and only re-derives from the base amount for lines that lack
//! one (or were posted in a different currency than the account's).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerflow_core::AccountId;

use crate::account::{Account, ChartOfAccounts};
use crate::currency::{Currency, ExchangeRate, round2};
use crate::journal::{JournalEntry, JournalEntryLine, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceOptions {
    /// Ignore draft entries.
    pub posted_only: bool,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self { posted_only: true }
    }
}

/// Signed balances, debit positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub currency: Currency,
    pub native: Decimal,
    pub base: Decimal,
}

impl AccountBalance {
    /// Native balance expressed on the account's normal side (a liability
    /// with more credits than debits is positive).
    pub fn native_normal(&self, account: &Account) -> Decimal {
        match account.account_type.normal_side() {
            Side::Debit => self.native,
            Side::Credit => -self.native,
        }
    }
}

fn native_delta(
    line: &JournalEntryLine,
    entry: &JournalEntry,
    account_currency: &Currency,
    base: &Currency,
) -> Decimal {
    if account_currency == base {
        return line.base_delta();
    }
    if line.original_currency.as_ref() == Some(account_currency) {
        if let Some(native) = line.native_delta() {
            return native;
        }
    }

    let rate: ExchangeRate = line.original_exchange_rate.unwrap_or(entry.exchange_rate);
    round2(line.base_delta() * rate.value())
}

fn included<'a>(
    entries: &'a [JournalEntry],
    options: BalanceOptions,
) -> impl Iterator<Item = &'a JournalEntry> {
    entries
        .iter()
        .filter(move |e| !options.posted_only || e.is_posted())
}

pub fn balance(
    account: &Account,
    entries: &[JournalEntry],
    options: BalanceOptions,
    base: &Currency,
) -> AccountBalance {
    let currency = account.effective_currency(base);
    let mut native = Decimal::ZERO;
    let mut base_total = Decimal::ZERO;

    for entry in included(entries, options) {
        for line in entry.lines.iter().filter(|l| l.account_id == account.id) {
            base_total += line.base_delta();
            native += native_delta(line, entry, currency, base);
        }
    }

    AccountBalance {
        account_id: account.id,
        currency: currency.clone(),
        native,
        base: base_total,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }
}

/// Base-currency debit and credit totals for every postable account, ordered
/// by chart code.
pub fn trial_balance(
    chart: &ChartOfAccounts,
    entries: &[JournalEntry],
    options: BalanceOptions,
) -> TrialBalance {
    let mut rows: Vec<TrialBalanceRow> = chart
        .iter()
        .filter(|a| !a.is_header)
        .map(|a| {
            let (debit, credit) = included(entries, options)
                .flat_map(|e| e.lines.iter())
                .filter(|l| l.account_id == a.id)
                .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), l| (d + l.debit, c + l.credit));
            TrialBalanceRow {
                account_id: a.id,
                code: a.code.clone(),
                name: a.name.clone(),
                debit,
                credit,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.code.cmp(&b.code));

    let total_debit = rows.iter().map(|r| r.debit).sum();
    let total_credit = rows.iter().map(|r| r.credit).sum();
    TrialBalance {
        rows,
        total_debit,
        total_credit,
    }
}
