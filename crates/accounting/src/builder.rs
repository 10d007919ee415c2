//! Journal entry builder: business event → balanced, postable entry.
//!
//! Lines are accumulated into a draft, rounded, stripped of zero-value lines
//! and only then validated. Validating before the zero-line pass would reject
//! entries that are fine once the noise is gone.
//!
//! Every event has exactly one balancing line (wallet leg, bank leg or net
//! liability). Its base amount is derived from the other lines' rounded base
//! amounts, so per-line rounding cannot push the entry out of balance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, BookingId, BranchId, ItemId, JournalEntryId, TenantId};

use crate::account::ChartOfAccounts;
use crate::allocation::{Booking, BookingItem, SettlementInput, allocate, item_share};
use crate::context::PostingContext;
use crate::currency::{Currency, ExchangeRate, round2, to_base, to_native};
use crate::error::{PostingError, PostingResult};
use crate::journal::{
    BALANCE_TOLERANCE, EntryStatus, JournalEntry, JournalEntryLine, LINE_EPSILON, Side,
};
use crate::settings::AccountRole;

/// Which wallet-liability role a cash movement touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletKind {
    Customer,
    Driver,
}

impl WalletKind {
    pub fn role(self) -> AccountRole {
        match self {
            WalletKind::Customer => AccountRole::CustomerWallet,
            WalletKind::Driver => AccountRole::DriverWallet,
        }
    }
}

/// Entry-level metadata supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub entry_id: JournalEntryId,
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    pub reference: String,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub related_document_id: Option<String>,
}

/// Deposit into / withdrawal out of a wallet through a bank account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMovement {
    pub amount: Decimal,
    pub currency: Currency,
    pub wallet: WalletKind,
    /// Bank account named on the request; falls back to the settlement bank role.
    #[serde(default)]
    pub bank_account_id: Option<AccountId>,
}

/// Courier cash-on-delivery remittance covering several items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPosting {
    pub cash_collected: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub bank_account_id: Option<AccountId>,
    pub items: Vec<BookingItem>,
    pub bookings: BTreeMap<BookingId, Booking>,
}

/// Recognize the fee of some items of a booking against the customer wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecognition {
    pub booking: Booking,
    pub items: Vec<ItemId>,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectPurchase {
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub expense_account_id: Option<AccountId>,
    #[serde(default)]
    pub bank_account_id: Option<AccountId>,
}

/// A plain amount credited to a wallet (driver earning, customer refund).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCredit {
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingEvent {
    Deposit(CashMovement),
    Withdrawal(CashMovement),
    Settlement(SettlementPosting),
    FeeRecognition(FeeRecognition),
    Transfer(Transfer),
    DirectPurchase(DirectPurchase),
    Earning(WalletCredit),
    Refund(WalletCredit),
}

impl PostingEvent {
    pub fn currency(&self) -> &Currency {
        match self {
            PostingEvent::Deposit(m) | PostingEvent::Withdrawal(m) => &m.currency,
            PostingEvent::Settlement(s) => &s.currency,
            PostingEvent::FeeRecognition(f) => &f.currency,
            PostingEvent::Transfer(t) => &t.currency,
            PostingEvent::DirectPurchase(p) => &p.currency,
            PostingEvent::Earning(c) | PostingEvent::Refund(c) => &c.currency,
        }
    }

    /// Amount the caller asked to move; fee recognition derives it from the booking.
    pub fn requested_amount(&self) -> Decimal {
        match self {
            PostingEvent::Deposit(m) | PostingEvent::Withdrawal(m) => m.amount,
            PostingEvent::Settlement(s) => s.cash_collected,
            PostingEvent::FeeRecognition(f) => f.booking.total_fee,
            PostingEvent::Transfer(t) => t.amount,
            PostingEvent::DirectPurchase(p) => p.amount,
            PostingEvent::Earning(c) | PostingEvent::Refund(c) => c.amount,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PostingEvent::Deposit(_) => "deposit",
            PostingEvent::Withdrawal(_) => "withdrawal",
            PostingEvent::Settlement(_) => "settlement",
            PostingEvent::FeeRecognition(_) => "fee_recognition",
            PostingEvent::Transfer(_) => "transfer",
            PostingEvent::DirectPurchase(_) => "direct_purchase",
            PostingEvent::Earning(_) => "earning",
            PostingEvent::Refund(_) => "refund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub header: EntryHeader,
    pub event: PostingEvent,
}

/// A built entry plus the idempotency markers the caller must persist with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub entry: JournalEntry,
    pub recognized: BTreeMap<BookingId, BTreeSet<ItemId>>,
    pub commission_total: Decimal,
}

/// Result of a dry run. Never touches storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingPreview {
    pub lines: Vec<JournalEntryLine>,
    pub is_valid: bool,
    pub errors: Vec<PostingError>,
}

struct DraftLine {
    account_id: AccountId,
    side: Side,
    native: Decimal,
    description: Option<String>,
}

/// Accumulates native-currency lines, then converts, rounds, filters and
/// balances them in one pass.
struct LineAccumulator {
    currency: Currency,
    rate: ExchangeRate,
    lines: Vec<DraftLine>,
    balancing: Option<DraftLine>,
}

impl LineAccumulator {
    fn new(currency: Currency, rate: ExchangeRate) -> Self {
        Self {
            currency,
            rate,
            lines: Vec::new(),
            balancing: None,
        }
    }

    fn push(&mut self, account_id: AccountId, side: Side, native: Decimal, description: &str) {
        let (side, native) = if native.is_sign_negative() {
            (side.opposite(), -native)
        } else {
            (side, native)
        };
        self.lines.push(DraftLine {
            account_id,
            side,
            native,
            description: Some(description.to_string()),
        });
    }

    /// The one line whose base amount absorbs the others' rounding.
    fn balance_with(&mut self, account_id: AccountId, side: Side, native: Decimal, description: &str) {
        let (side, native) = if native.is_sign_negative() {
            (side.opposite(), -native)
        } else {
            (side, native)
        };
        self.balancing = Some(DraftLine {
            account_id,
            side,
            native,
            description: Some(description.to_string()),
        });
    }

    fn line(&self, draft: &DraftLine, side: Side, base: Decimal, native: Decimal) -> JournalEntryLine {
        let (debit, credit, original_debit, original_credit) = match side {
            Side::Debit => (base, Decimal::ZERO, native, Decimal::ZERO),
            Side::Credit => (Decimal::ZERO, base, Decimal::ZERO, native),
        };
        JournalEntryLine {
            account_id: draft.account_id,
            debit,
            credit,
            original_currency: Some(self.currency.clone()),
            original_exchange_rate: Some(self.rate),
            original_debit: Some(original_debit),
            original_credit: Some(original_credit),
            description: draft.description.clone(),
        }
    }

    fn finish(self) -> PostingResult<Vec<JournalEntryLine>> {
        let mut out = Vec::with_capacity(self.lines.len() + 1);
        let mut delta = Decimal::ZERO;

        for draft in &self.lines {
            let native = round2(draft.native);
            let base = to_base(native, self.rate)?;
            if base.abs() < LINE_EPSILON {
                continue;
            }
            delta += match draft.side {
                Side::Debit => base,
                Side::Credit => -base,
            };
            out.push(self.line(draft, draft.side, base, native));
        }

        if let Some(draft) = &self.balancing {
            // delta > 0 means the other lines are debit-heavy.
            let base = delta.abs();
            if base >= LINE_EPSILON {
                let side = if delta.is_sign_positive() { Side::Credit } else { Side::Debit };
                if side != draft.side {
                    tracing::debug!(
                        account = %draft.account_id,
                        "balancing line flipped side after rounding"
                    );
                }
                // A flipped line owes the opposite way; its requested native
                // amount no longer describes it.
                let native = if side == draft.side {
                    round2(draft.native)
                } else {
                    to_native(base, self.rate)?
                };
                out.push(self.line(draft, side, base, native));
            }
        }

        Ok(out)
    }
}

/// Checks a candidate line set against the posting invariants, returning every
/// violation found.
pub fn validate_lines(lines: &[JournalEntryLine], chart: &ChartOfAccounts) -> Vec<PostingError> {
    let mut errors = Vec::new();

    if lines.is_empty() {
        errors.push(PostingError::EmptyEntry);
        return errors;
    }

    let mut reported = BTreeSet::new();
    for line in lines {
        if let Err(e) = chart.postable(&line.account_id) {
            if reported.insert(line.account_id) {
                errors.push(e);
            }
        }
    }

    let (debit, credit) = lines
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), l| (d + l.debit, c + l.credit));
    if (debit - credit).abs() >= BALANCE_TOLERANCE {
        errors.push(PostingError::UnbalancedEntry { debit, credit });
    }

    errors
}

struct Draft {
    lines: Vec<JournalEntryLine>,
    currency: Currency,
    rate: ExchangeRate,
    original_total: Decimal,
    recognized: BTreeMap<BookingId, BTreeSet<ItemId>>,
    commission_total: Decimal,
}

/// Builds journal entries from posting requests against one posting context.
#[derive(Debug, Clone, Copy)]
pub struct JournalEntryBuilder<'a> {
    ctx: PostingContext<'a>,
}

impl<'a> JournalEntryBuilder<'a> {
    pub fn new(ctx: PostingContext<'a>) -> Self {
        Self { ctx }
    }

    /// Build a postable entry or fail without side effects.
    pub fn build(&self, request: &PostingRequest) -> PostingResult<Posting> {
        let draft = self.draft(&request.event)?;
        if let Some(err) = validate_lines(&draft.lines, self.ctx.chart).into_iter().next() {
            return Err(err);
        }

        let header = &request.header;
        let entry = JournalEntry {
            id: header.entry_id,
            tenant_id: header.tenant_id,
            date: header.occurred_at.date_naive(),
            description: header.description.clone(),
            reference: header.reference.clone(),
            branch_id: header.branch_id,
            currency: draft.currency,
            exchange_rate: draft.rate,
            original_total: draft.original_total,
            lines: draft.lines,
            status: EntryStatus::Posted,
            created_at: header.occurred_at,
            related_document_id: header.related_document_id.clone(),
            reversal_of: None,
        };

        let (debit, credit) = entry.totals();
        tracing::info!(
            entry_id = %entry.id,
            kind = request.event.kind(),
            currency = %entry.currency,
            lines = entry.lines.len(),
            %debit,
            %credit,
            "journal entry built"
        );

        Ok(Posting {
            entry,
            recognized: draft.recognized,
            commission_total: draft.commission_total,
        })
    }

    /// Dry run for approvers: candidate lines plus every validation problem.
    pub fn preview(&self, request: &PostingRequest) -> PostingPreview {
        match self.draft(&request.event) {
            Ok(draft) => {
                let errors = validate_lines(&draft.lines, self.ctx.chart);
                PostingPreview {
                    is_valid: errors.is_empty(),
                    lines: draft.lines,
                    errors,
                }
            }
            Err(err) => PostingPreview {
                lines: Vec::new(),
                is_valid: false,
                errors: vec![err],
            },
        }
    }

    fn draft(&self, event: &PostingEvent) -> PostingResult<Draft> {
        let currency = event.currency().clone();
        let amount = event.requested_amount();
        if amount <= Decimal::ZERO {
            return Err(PostingError::invalid_amount(format!(
                "{} amount must be positive, got {amount}",
                event.kind()
            )));
        }

        if self.ctx.rates.base != self.ctx.settings.base_currency {
            return Err(PostingError::InvalidExchangeRate {
                currency: self.ctx.rates.base.clone(),
                reason: format!(
                    "rate snapshot is quoted against {} but the books are kept in {}",
                    self.ctx.rates.base, self.ctx.settings.base_currency
                ),
            });
        }
        let rate = self.ctx.rates.rate_for(&currency)?;

        let mut acc = LineAccumulator::new(currency.clone(), rate);
        let mut recognized = BTreeMap::new();
        let mut commission_total = Decimal::ZERO;
        let mut original_total = amount;

        match event {
            PostingEvent::Deposit(m) => {
                let bank = self.bank_account(m.bank_account_id, &currency)?;
                let wallet = self.ctx.resolve(m.wallet.role(), &currency)?;
                acc.push(bank, Side::Debit, m.amount, "Wallet deposit");
                acc.balance_with(wallet, Side::Credit, m.amount, "Wallet deposit");
            }
            PostingEvent::Withdrawal(m) => {
                let bank = self.bank_account(m.bank_account_id, &currency)?;
                let wallet = self.ctx.resolve(m.wallet.role(), &currency)?;
                acc.push(wallet, Side::Debit, m.amount, "Wallet withdrawal");
                acc.balance_with(bank, Side::Credit, m.amount, "Wallet withdrawal");
            }
            PostingEvent::Settlement(s) => {
                let allocation = allocate(
                    &SettlementInput {
                        cash_collected: s.cash_collected,
                        currency: &currency,
                        items: &s.items,
                        bookings: &s.bookings,
                    },
                    &self.ctx,
                )?;

                let cash = self.bank_account(s.bank_account_id, &currency)?;
                acc.push(cash, Side::Debit, s.cash_collected, "Cash collected");
                for (account, revenue) in &allocation.revenue_by_account {
                    acc.push(*account, Side::Credit, *revenue, "Service revenue");
                }
                for (account, tax) in &allocation.tax_by_account {
                    acc.push(*account, Side::Credit, *tax, "Tax payable");
                }

                if allocation.commission_total > Decimal::ZERO {
                    match self.commission_pair(&currency) {
                        Some((expense, payable)) => {
                            acc.push(expense, Side::Debit, allocation.commission_total, "Driver commission");
                            acc.push(payable, Side::Credit, allocation.commission_total, "Driver commission");
                            commission_total = allocation.commission_total;
                        }
                        None => tracing::warn!(
                            commission = %allocation.commission_total,
                            %currency,
                            "commission accounts not configured; commission not posted"
                        ),
                    }
                }

                let wallet = self.ctx.resolve(AccountRole::CustomerWallet, &currency)?;
                let net = allocation.net_liability;
                acc.balance_with(wallet, net.polarity, net.amount, "Net owed to customer");
                recognized = allocation.recognized;
            }
            PostingEvent::FeeRecognition(f) => {
                let mut pending = BTreeSet::new();
                for item in &f.items {
                    if !f.booking.is_recognized(item) {
                        pending.insert(*item);
                    }
                }
                if pending.is_empty() {
                    return Err(PostingError::AlreadyRecognized);
                }
                let capacity = f.booking.item_count.max(1) as usize;
                let remaining = capacity.saturating_sub(f.booking.recognized_items.len());
                if pending.len() > remaining {
                    return Err(PostingError::ItemCountExceeded {
                        booking: f.booking.id,
                        requested: pending.len(),
                        remaining,
                    });
                }

                let share = item_share(&f.booking, &currency, &self.ctx)?;
                let count = Decimal::from(pending.len() as u64);
                let revenue = (share.fee - share.tax) * count;
                let tax = share.tax * count;

                if !revenue.is_zero() {
                    let account = self.ctx.resolve(f.booking.service_type.revenue_role(), &currency)?;
                    acc.push(account, Side::Credit, revenue, "Fee recognized");
                }
                if !tax.is_zero() {
                    let account = self.ctx.resolve(AccountRole::TaxPayable, &currency)?;
                    acc.push(account, Side::Credit, tax, "Tax on recognized fee");
                }
                let wallet = self.ctx.resolve(AccountRole::CustomerWallet, &currency)?;
                acc.balance_with(wallet, Side::Debit, revenue + tax, "Fee charged to wallet");

                original_total = round2(revenue + tax);
                recognized.insert(f.booking.id, pending);
            }
            PostingEvent::Transfer(t) => {
                if t.from == t.to {
                    return Err(PostingError::invalid_amount(
                        "transfer source and destination must differ",
                    ));
                }
                acc.push(t.to, Side::Debit, t.amount, "Transfer in");
                acc.balance_with(t.from, Side::Credit, t.amount, "Transfer out");
            }
            PostingEvent::DirectPurchase(p) => {
                let expense = self.ctx.resolve_preferring(
                    p.expense_account_id,
                    AccountRole::PurchaseExpense,
                    &currency,
                )?;
                let bank = self.bank_account(p.bank_account_id, &currency)?;
                acc.push(expense, Side::Debit, p.amount, "Direct purchase");
                acc.balance_with(bank, Side::Credit, p.amount, "Direct purchase");
            }
            PostingEvent::Earning(c) => {
                let expense = self.ctx.resolve(AccountRole::CommissionExpense, &currency)?;
                let wallet = self.ctx.resolve(AccountRole::DriverWallet, &currency)?;
                acc.push(expense, Side::Debit, c.amount, "Driver earning");
                acc.balance_with(wallet, Side::Credit, c.amount, "Driver earning");
            }
            PostingEvent::Refund(c) => {
                let returns = self.ctx.resolve(AccountRole::SalesReturns, &currency)?;
                let wallet = self.ctx.resolve(AccountRole::CustomerWallet, &currency)?;
                acc.push(returns, Side::Debit, c.amount, "Customer refund");
                acc.balance_with(wallet, Side::Credit, c.amount, "Customer refund");
            }
        }

        Ok(Draft {
            lines: acc.finish()?,
            currency,
            rate,
            original_total,
            recognized,
            commission_total,
        })
    }

    fn bank_account(&self, requested: Option<AccountId>, currency: &Currency) -> PostingResult<AccountId> {
        self.ctx
            .resolve_preferring(requested, AccountRole::SettlementBank, currency)
    }

    /// Both commission roles, or `None` if either is unconfigured.
    fn commission_pair(&self, currency: &Currency) -> Option<(AccountId, AccountId)> {
        let expense = self.ctx.resolve(AccountRole::CommissionExpense, currency).ok()?;
        let payable = self.ctx.resolve(AccountRole::CommissionPayable, currency).ok()?;
        Some((expense, payable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountType};
    use crate::allocation::{CommissionLeg, CommissionRule, CommissionType, ServiceType};
    use crate::settings::AccountOverrides;
    use crate::testing::{Books, booking, item};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn header() -> EntryHeader {
        EntryHeader {
            entry_id: JournalEntryId::new(),
            tenant_id: TenantId::new(),
            occurred_at: Utc::now(),
            description: "test posting".to_string(),
            reference: "WT-1".to_string(),
            branch_id: None,
            related_document_id: None,
        }
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn khr() -> Currency {
        Currency::new("KHR").unwrap()
    }

    fn request(event: PostingEvent) -> PostingRequest {
        PostingRequest { header: header(), event }
    }

    fn line_for(entry: &JournalEntry, account: AccountId) -> &JournalEntryLine {
        entry
            .lines
            .iter()
            .find(|l| l.account_id == account)
            .unwrap_or_else(|| panic!("no line for {account}"))
    }

    fn split_rules() -> Vec<CommissionRule> {
        vec![
            CommissionRule {
                zone_name: "phnom penh".to_string(),
                rule_type: CommissionType::Percentage,
                value: dec!(30),
                is_default: true,
                leg: CommissionLeg::Pickup,
            },
            CommissionRule {
                zone_name: "phnom penh".to_string(),
                rule_type: CommissionType::Percentage,
                value: dec!(70),
                is_default: true,
                leg: CommissionLeg::Delivery,
            },
        ]
    }

    fn settlement(cash: Decimal, fee: Decimal, tax: Decimal, zones: bool) -> PostingEvent {
        let b = booking(ServiceType::Delivery, "USD", fee, tax, 1);
        let zone = zones.then_some("phnom penh");
        let items = vec![item(&b, zone, zone)];
        PostingEvent::Settlement(SettlementPosting {
            cash_collected: cash,
            currency: usd(),
            bank_account_id: None,
            items,
            bookings: BTreeMap::from([(b.id, b)]),
        })
    }

    #[test]
    fn deposit_posts_bank_debit_and_wallet_credit() {
        let books = Books::new();
        let posting = JournalEntryBuilder::new(books.ctx())
            .build(&request(PostingEvent::Deposit(CashMovement {
                amount: dec!(200000),
                currency: khr(),
                wallet: WalletKind::Customer,
                bank_account_id: None,
            })))
            .unwrap();
        let entry = posting.entry;

        let bank = line_for(&entry, books.id_in(AccountRole::SettlementBank, "KHR"));
        assert_eq!(bank.debit, dec!(50));
        assert_eq!(bank.original_debit, Some(dec!(200000)));
        let wallet = line_for(&entry, books.id_in(AccountRole::CustomerWallet, "KHR"));
        assert_eq!(wallet.credit, dec!(50));
        assert_eq!(wallet.original_credit, Some(dec!(200000)));
        assert_eq!(entry.exchange_rate.value(), dec!(4000));
        assert_eq!(entry.original_total, dec!(200000));
        assert!(entry.is_balanced());
    }

    #[test]
    fn withdrawal_uses_requested_bank_account() {
        let books = Books::new();
        let bank = books.id(AccountRole::PurchaseExpense);
        let entry = JournalEntryBuilder::new(books.ctx())
            .build(&request(PostingEvent::Withdrawal(CashMovement {
                amount: dec!(12.5),
                currency: usd(),
                wallet: WalletKind::Driver,
                bank_account_id: Some(bank),
            })))
            .unwrap()
            .entry;

        assert_eq!(line_for(&entry, books.id(AccountRole::DriverWallet)).debit, dec!(12.5));
        assert_eq!(line_for(&entry, bank).credit, dec!(12.5));
    }

    #[test]
    fn settlement_matches_worked_example() {
        let mut books = Books::new();
        books.settings.commission_rules = split_rules();

        let entry = JournalEntryBuilder::new(books.ctx())
            .build(&request(settlement(dec!(50), dec!(5), dec!(0), true)))
            .unwrap()
            .entry;

        assert_eq!(line_for(&entry, books.id(AccountRole::SettlementBank)).debit, dec!(50));
        assert_eq!(line_for(&entry, books.id(AccountRole::DeliveryRevenue)).credit, dec!(5));
        assert_eq!(line_for(&entry, books.id(AccountRole::CommissionExpense)).debit, dec!(5));
        assert_eq!(line_for(&entry, books.id(AccountRole::CommissionPayable)).credit, dec!(5));
        assert_eq!(line_for(&entry, books.id(AccountRole::CustomerWallet)).credit, dec!(45));
        // zero tax never shows up
        assert!(entry.lines.iter().all(|l| l.account_id != books.id(AccountRole::TaxPayable)));
        assert_eq!(entry.lines.len(), 5);
        assert_eq!(entry.totals(), (dec!(55), dec!(55)));
    }

    #[test]
    fn fees_above_cash_debit_the_liability() {
        let books = Books::new();
        let entry = JournalEntryBuilder::new(books.ctx())
            .build(&request(settlement(dec!(3), dec!(8), dec!(1), false)))
            .unwrap()
            .entry;

        let wallet = line_for(&entry, books.id(AccountRole::CustomerWallet));
        assert_eq!(wallet.debit, dec!(5));
        assert_eq!(wallet.credit, dec!(0));
        assert_eq!(wallet.original_debit, Some(dec!(5)));
        assert!(entry.is_balanced());
    }

    #[test]
    fn commission_pair_is_skipped_when_unconfigured() {
        let mut books = Books::new();
        books.settings.commission_rules = split_rules();
        let accounts: Vec<Account> = books
            .chart
            .iter()
            .filter(|a| !a.code.starts_with(AccountRole::CommissionPayable.reserved_code()))
            .cloned()
            .collect();
        books.chart = ChartOfAccounts::new(accounts).unwrap();

        let posting = JournalEntryBuilder::new(books.ctx())
            .build(&request(settlement(dec!(50), dec!(5), dec!(0), true)))
            .unwrap();

        assert_eq!(posting.commission_total, dec!(0));
        assert!(posting.entry.lines.iter().all(|l| l.account_id != books.id(AccountRole::CommissionExpense)));
        assert!(posting.entry.is_balanced());
    }

    #[test]
    fn missing_customer_wallet_aborts_whole_settlement() {
        let mut books = Books::new();
        let accounts: Vec<Account> = books
            .chart
            .iter()
            .filter(|a| a.code != AccountRole::CustomerWallet.reserved_code())
            .cloned()
            .collect();
        books.chart = ChartOfAccounts::new(accounts).unwrap();

        let err = JournalEntryBuilder::new(books.ctx())
            .build(&request(settlement(dec!(50), dec!(5), dec!(0), false)))
            .unwrap_err();
        assert_eq!(
            err,
            PostingError::UnconfiguredAccountRole {
                role: AccountRole::CustomerWallet,
                currency: usd(),
            }
        );
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let books = Books::new();
        let builder = JournalEntryBuilder::new(books.ctx());
        for amount in [dec!(0), dec!(-1)] {
            let err = builder
                .build(&request(PostingEvent::Earning(WalletCredit { amount, currency: usd() })))
                .unwrap_err();
            assert!(matches!(err, PostingError::InvalidAmount(_)));
        }
    }

    #[test]
    fn missing_rate_blocks_posting() {
        let books = Books::new();
        let err = JournalEntryBuilder::new(books.ctx())
            .build(&request(PostingEvent::Refund(WalletCredit {
                amount: dec!(10),
                currency: Currency::new("THB").unwrap(),
            })))
            .unwrap_err();
        assert!(matches!(err, PostingError::InvalidExchangeRate { .. }));
    }

    #[test]
    fn tiny_amount_rounds_to_nothing_and_fails() {
        let books = Books::new();
        let err = JournalEntryBuilder::new(books.ctx())
            .build(&request(PostingEvent::Deposit(CashMovement {
                amount: dec!(10),
                currency: khr(),
                wallet: WalletKind::Customer,
                bank_account_id: None,
            })))
            .unwrap_err();
        assert_eq!(err, PostingError::EmptyEntry);
    }

    #[test]
    fn zero_value_lines_are_dropped() {
        let books = Books::new();
        // 1 KHR of tax converts to 0.00 USD; the tax line must disappear.
        let b = booking(ServiceType::Delivery, "KHR", dec!(40001), dec!(1), 1);
        let items = vec![item(&b, None, None)];
        let entry = JournalEntryBuilder::new(books.ctx())
            .build(&request(PostingEvent::Settlement(SettlementPosting {
                cash_collected: dec!(400000),
                currency: khr(),
                bank_account_id: None,
                items,
                bookings: BTreeMap::from([(b.id, b)]),
            })))
            .unwrap()
            .entry;

        assert!(entry.lines.iter().all(|l| (l.debit - l.credit).abs() >= LINE_EPSILON));
        assert!(entry.lines.iter().all(|l| l.account_id != books.id_in(AccountRole::TaxPayable, "KHR")));
        assert!(entry.is_balanced());
    }

    #[test]
    fn fee_recognition_is_idempotent_per_item() {
        let books = Books::new();
        let builder = JournalEntryBuilder::new(books.ctx());
        let mut b = booking(ServiceType::Express, "USD", dec!(6), dec!(0.6), 2);
        let first = item(&b, None, None).id;

        let posting = builder
            .build(&request(PostingEvent::FeeRecognition(FeeRecognition {
                booking: b.clone(),
                items: vec![first],
                currency: usd(),
            })))
            .unwrap();
        assert_eq!(line_for(&posting.entry, books.id(AccountRole::ExpressRevenue)).credit, dec!(2.7));
        assert_eq!(line_for(&posting.entry, books.id(AccountRole::TaxPayable)).credit, dec!(0.3));
        assert_eq!(line_for(&posting.entry, books.id(AccountRole::CustomerWallet)).debit, dec!(3));
        assert_eq!(posting.recognized[&b.id], BTreeSet::from([first]));

        b.recognized_items.extend(posting.recognized[&b.id].iter().copied());
        let again = builder.build(&request(PostingEvent::FeeRecognition(FeeRecognition {
            booking: b,
            items: vec![first],
            currency: usd(),
        })));
        assert_eq!(again.unwrap_err(), PostingError::AlreadyRecognized);
    }

    #[test]
    fn fee_recognition_cannot_exceed_the_booking_item_count() {
        let books = Books::new();
        let builder = JournalEntryBuilder::new(books.ctx());
        let mut b = booking(ServiceType::Delivery, "USD", dec!(5), dec!(0), 2);
        b.recognized_items.insert(item(&b, None, None).id);
        let extra = [item(&b, None, None).id, item(&b, None, None).id];

        let err = builder
            .build(&request(PostingEvent::FeeRecognition(FeeRecognition {
                booking: b.clone(),
                items: extra.to_vec(),
                currency: usd(),
            })))
            .unwrap_err();
        assert_eq!(
            err,
            PostingError::ItemCountExceeded {
                booking: b.id,
                requested: 2,
                remaining: 1,
            }
        );
    }

    #[test]
    fn flipped_balancing_line_mirrors_its_base_amount() {
        let khr = khr();
        let rate = ExchangeRate::new(dec!(4000)).unwrap();
        let (cash, wallet) = (AccountId::new(), AccountId::new());

        // 61 KHR rounds to 0.02 while each 20 KHR credit rounds up to 0.01.
        let mut acc = LineAccumulator::new(khr, rate);
        acc.push(cash, Side::Debit, dec!(61), "cash");
        for _ in 0..3 {
            acc.push(AccountId::new(), Side::Credit, dec!(20), "fee");
        }
        acc.balance_with(wallet, Side::Credit, dec!(1), "net");

        let lines = acc.finish().unwrap();
        let plug = lines.iter().find(|l| l.account_id == wallet).unwrap();
        assert_eq!((plug.debit, plug.credit), (dec!(0.01), dec!(0)));
        assert_eq!(plug.original_debit, Some(dec!(40)));
        assert_eq!(plug.original_credit, Some(dec!(0)));
    }

    #[test]
    fn transfer_and_purchase_post_two_legs() {
        let books = Books::new();
        let builder = JournalEntryBuilder::new(books.ctx());
        let (from, to) = (books.id(AccountRole::SettlementBank), books.id(AccountRole::DriverWallet));

        let transfer = builder
            .build(&request(PostingEvent::Transfer(Transfer { from, to, amount: dec!(9), currency: usd() })))
            .unwrap()
            .entry;
        assert_eq!(line_for(&transfer, to).debit, dec!(9));
        assert_eq!(line_for(&transfer, from).credit, dec!(9));

        let same = builder.build(&request(PostingEvent::Transfer(Transfer {
            from,
            to: from,
            amount: dec!(9),
            currency: usd(),
        })));
        assert!(matches!(same, Err(PostingError::InvalidAmount(_))));

        let purchase = builder
            .build(&request(PostingEvent::DirectPurchase(DirectPurchase {
                amount: dec!(4.2),
                currency: usd(),
                expense_account_id: None,
                bank_account_id: None,
            })))
            .unwrap()
            .entry;
        assert_eq!(line_for(&purchase, books.id(AccountRole::PurchaseExpense)).debit, dec!(4.2));
        assert_eq!(line_for(&purchase, books.id(AccountRole::SettlementBank)).credit, dec!(4.2));
    }

    #[test]
    fn header_account_override_is_rejected() {
        let mut books = Books::new();
        let header = books.header_id();
        books.overrides = AccountOverrides::none().with(AccountRole::DriverWallet, header);
        let err = JournalEntryBuilder::new(books.ctx())
            .build(&request(PostingEvent::Earning(WalletCredit { amount: dec!(1), currency: usd() })))
            .unwrap_err();
        assert_eq!(err, PostingError::HeaderAccount(header));
    }

    #[test]
    fn preview_reports_lines_and_problems_without_failing() {
        let mut books = Books::new();
        let ok = JournalEntryBuilder::new(books.ctx())
            .preview(&request(settlement(dec!(50), dec!(5), dec!(0), false)));
        assert!(ok.is_valid);
        assert_eq!(ok.lines.len(), 3);

        let stray = Account::new("9999", "Suspense", AccountType::Asset);
        let stray_id = stray.id;
        books.overrides = AccountOverrides::none().with(AccountRole::SettlementBank, stray_id);
        let bad = JournalEntryBuilder::new(books.ctx())
            .preview(&request(settlement(dec!(50), dec!(5), dec!(0), false)));
        assert!(!bad.is_valid);
        assert_eq!(bad.lines.len(), 3);
        assert_eq!(bad.errors, vec![PostingError::UnknownAccount(stray_id)]);
    }

    #[test]
    fn validate_lines_flags_unbalanced_sets() {
        let books = Books::new();
        let mk = |account_id, debit, credit| JournalEntryLine {
            account_id,
            debit,
            credit,
            original_currency: None,
            original_exchange_rate: None,
            original_debit: None,
            original_credit: None,
            description: None,
        };
        let lines = vec![
            mk(books.id(AccountRole::SettlementBank), dec!(10), dec!(0)),
            mk(books.id(AccountRole::CustomerWallet), dec!(0), dec!(9.98)),
        ];
        assert_eq!(
            validate_lines(&lines, &books.chart),
            vec![PostingError::UnbalancedEntry { debit: dec!(10), credit: dec!(9.98) }]
        );
        assert_eq!(validate_lines(&[], &books.chart), vec![PostingError::EmptyEntry]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Every settlement the builder accepts balances in base currency.
        #[test]
        fn built_settlements_always_balance(
            cash_cents in 1i64..100_000_000i64,
            bookings in prop::collection::vec((0i64..5_000_000i64, 0u8..=100u8, 0u32..7u32, 1usize..4usize), 1..6),
            pickup_pct in 0i64..10_000i64,
            fixed_cents in 0i64..10_000i64,
            in_khr in any::<bool>(),
        ) {
            let mut books = Books::new();
            books.settings.commission_rules = vec![
                CommissionRule {
                    zone_name: "z".to_string(),
                    rule_type: CommissionType::Percentage,
                    value: Decimal::new(pickup_pct, 2),
                    is_default: true,
                    leg: CommissionLeg::Pickup,
                },
                CommissionRule {
                    zone_name: "z".to_string(),
                    rule_type: CommissionType::FixedAmount,
                    value: Decimal::new(fixed_cents, 2),
                    is_default: true,
                    leg: CommissionLeg::Delivery,
                },
            ];
            let currency = if in_khr { "KHR" } else { "USD" };

            let mut items = Vec::new();
            let mut by_id = BTreeMap::new();
            for (fee_cents, tax_pct, count, included) in bookings {
                let fee = Decimal::new(fee_cents, 2);
                let tax = round2(fee * Decimal::from(tax_pct) / Decimal::ONE_HUNDRED);
                let b = booking(ServiceType::Delivery, currency, fee, tax, count);
                for _ in 0..included {
                    items.push(item(&b, Some("z"), Some("z")));
                }
                by_id.insert(b.id, b);
            }

            let result = JournalEntryBuilder::new(books.ctx()).build(&request(PostingEvent::Settlement(
                SettlementPosting {
                    cash_collected: Decimal::new(cash_cents, 2),
                    currency: Currency::new(currency).unwrap(),
                    bank_account_id: None,
                    items,
                    bookings: by_id,
                },
            )));

            match result {
                Ok(posting) => {
                    let (debit, credit) = posting.entry.totals();
                    prop_assert_eq!(debit, credit);
                    prop_assert!(posting.entry.lines.iter().all(|l| (l.debit - l.credit).abs() >= LINE_EPSILON));
                }
                Err(PostingError::EmptyEntry) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}
