//! Settlement service (application-level orchestration).
//!
//! ```text
//! approve(transaction)
//!   ↓
//! 1. Load the PENDING transaction, its items, bookings and user overrides
//!   ↓
//! 2. Build the journal entry (pure; failure leaves everything untouched)
//!   ↓
//! 3. Decide the state transition on the aggregate
//!   ↓
//! 4. Commit entry + transaction + cleared items + booking markers + audit
//!    records as one batch, each document guarded by its version
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use ledgerflow_accounting::{
    AccountBalance, AccountOverrides, AccountResolver, BalanceOptions, Booking, ChartOfAccounts,
    EntryHeader, FeeRecognition, JournalEntry, JournalEntryBuilder, PostingContext, PostingError,
    PostingEvent, PostingPreview, PostingRequest, PostingSettings, RateSnapshot, TrialBalance,
    balance, trial_balance,
};
use ledgerflow_core::{
    AccountId, Aggregate, AggregateRoot, BookingId, ExpectedVersion, ItemId, JournalEntryId, TenantId, UserId,
    WalletTransactionId,
};
use ledgerflow_events::{EventRecord, EventRecordError};
use ledgerflow_wallet::{
    ApproveWalletTransaction, FailWalletTransaction, NewWalletTransaction,
    RejectWalletTransaction, RequestWalletTransaction, SettlementDocuments, WalletError,
    WalletTransaction, WalletTransactionCommand, WalletTransactionEvent, WalletTransactionType,
};

use crate::ledger_store::{LedgerStore, StoreError, Versioned, WriteBatch};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Posting(#[from] PostingError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Event(#[from] EventRecordError),

    #[error("wallet transaction {0} not found")]
    TransactionNotFound(WalletTransactionId),

    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    #[error("item {item} does not belong to booking {booking}")]
    ItemNotInBooking { item: ItemId, booking: BookingId },

    #[error("item {0} was already cleared by an earlier settlement")]
    ItemAlreadyCleared(ItemId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("journal entry {0} not found")]
    EntryNotFound(JournalEntryId),

    #[error("journal entry {0} has already been reversed")]
    AlreadyReversed(JournalEntryId),
}

impl SettlementError {
    /// True for the "someone else got there first" outcome of an approval.
    pub fn is_already_processed(&self) -> bool {
        matches!(self, SettlementError::Wallet(WalletError::AlreadyProcessed { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub transaction: WalletTransaction,
    pub entry: JournalEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Posted(JournalEntry),
    /// Every requested item was recognized before; nothing was written.
    AlreadyRecognized,
}

/// Everything an approval needs, loaded before the build.
struct PostingInputs {
    request: PostingRequest,
    loaded: LoadedSettlement,
    overrides: AccountOverrides,
}

#[derive(Default)]
struct LoadedSettlement {
    documents: SettlementDocuments,
    booking_versions: BTreeMap<BookingId, u64>,
    item_versions: BTreeMap<ItemId, u64>,
}

/// Posting-engine operations over one ledger store and one tenant configuration.
pub struct SettlementService<S> {
    store: S,
    settings: PostingSettings,
    resolver: AccountResolver,
}

impl<S> SettlementService<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, settings: PostingSettings) -> Self {
        Self {
            store,
            settings,
            resolver: AccountResolver::standard(),
        }
    }

    pub fn with_resolver(mut self, resolver: AccountResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &PostingSettings {
        &self.settings
    }

    /// Submit a new PENDING wallet transaction.
    pub fn request(
        &self,
        tenant_id: TenantId,
        request: NewWalletTransaction,
        occurred_at: DateTime<Utc>,
    ) -> Result<WalletTransaction, SettlementError> {
        let id = WalletTransactionId::new();
        let mut transaction = WalletTransaction::empty(id);
        let command = WalletTransactionCommand::Request(RequestWalletTransaction {
            tenant_id,
            transaction_id: id,
            request,
            occurred_at,
        });
        let events = transaction.handle(&command)?;
        for e in &events {
            transaction.apply(e);
        }

        let batch = WriteBatch::new()
            .put_wallet_transaction(transaction.clone(), ExpectedVersion::Absent)
            .append_events(records(&events)?);
        self.store.commit(tenant_id, batch)?;

        tracing::info!(tenant_id = %tenant_id, transaction_id = %id, "wallet transaction requested");
        Ok(transaction)
    }

    /// Dry run of the entry an approval would post. Writes nothing.
    pub fn preview(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        rates: &RateSnapshot,
    ) -> Result<PostingPreview, SettlementError> {
        let current = self.load_transaction(tenant_id, transaction_id)?;
        if !current.value.is_pending() {
            return Err(WalletError::AlreadyProcessed {
                id: transaction_id,
                status: current.value.status(),
            }
            .into());
        }
        let inputs = self.posting_inputs(tenant_id, &current.value, Utc::now())?;
        let chart = self.store.chart(tenant_id)?;
        let ctx = self.context(&chart, rates, &inputs.overrides);
        Ok(JournalEntryBuilder::new(ctx).preview(&inputs.request))
    }

    /// Build and post the transaction's entry and mark it APPROVED, atomically.
    pub fn approve(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        approver: UserId,
        rates: &RateSnapshot,
        occurred_at: DateTime<Utc>,
    ) -> Result<Approval, SettlementError> {
        let current = self.load_transaction(tenant_id, transaction_id)?;
        let mut transaction = current.value.clone();
        if !transaction.is_pending() {
            return Err(WalletError::AlreadyProcessed {
                id: transaction_id,
                status: transaction.status(),
            }
            .into());
        }

        let PostingInputs {
            request,
            loaded,
            overrides,
        } = match self.posting_inputs(tenant_id, &transaction, occurred_at) {
            Ok(inputs) => inputs,
            // The items may have been cleared by a concurrent approval of this
            // same transaction.
            Err(err @ SettlementError::ItemAlreadyCleared(_)) => {
                return Err(self.explain_cleared_item(tenant_id, transaction_id, err));
            }
            Err(err) => return Err(err),
        };
        let chart = self.store.chart(tenant_id)?;
        let posting = JournalEntryBuilder::new(self.context(&chart, rates, &overrides)).build(&request)?;

        let command = WalletTransactionCommand::Approve(ApproveWalletTransaction {
            tenant_id,
            transaction_id,
            journal_entry_id: posting.entry.id,
            approver,
            occurred_at,
        });
        let events = transaction.handle(&command)?;
        for e in &events {
            transaction.apply(e);
        }

        let mut batch = WriteBatch::new()
            .append_entry(posting.entry.clone())
            .put_wallet_transaction(transaction.clone(), ExpectedVersion::Exact(current.version));
        for mut item in loaded.documents.items {
            let version = loaded.item_versions.get(&item.id).copied().unwrap_or_default();
            item.cleared = true;
            batch = batch.put_item(item, ExpectedVersion::Exact(version));
        }
        for (booking_id, items) in &posting.recognized {
            let Some(mut booking) = loaded.documents.bookings.get(booking_id).cloned() else {
                continue;
            };
            let version = loaded.booking_versions.get(booking_id).copied().unwrap_or_default();
            booking.recognized_items.extend(items.iter().copied());
            batch = batch.put_booking(booking, ExpectedVersion::Exact(version));
        }
        batch = batch.append_events(records(&events)?);

        if let Err(err) = self.store.commit(tenant_id, batch) {
            return Err(self.explain_lost_race(tenant_id, transaction_id, err));
        }

        tracing::info!(
            tenant_id = %tenant_id,
            transaction_id = %transaction_id,
            entry_id = %posting.entry.id,
            "wallet transaction approved"
        );
        Ok(Approval {
            transaction,
            entry: posting.entry,
        })
    }

    /// Close the transaction as REJECTED. The ledger is never touched.
    pub fn reject(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        approver: UserId,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<WalletTransaction, SettlementError> {
        let command = WalletTransactionCommand::Reject(RejectWalletTransaction {
            tenant_id,
            transaction_id,
            reason: reason.to_string(),
            approver,
            occurred_at,
        });
        let transaction = self.transition(tenant_id, transaction_id, &command)?;
        tracing::info!(tenant_id = %tenant_id, transaction_id = %transaction_id, "wallet transaction rejected");
        Ok(transaction)
    }

    /// Close a transaction that can never be posted as FAILED.
    pub fn fail(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        operator: UserId,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<WalletTransaction, SettlementError> {
        let command = WalletTransactionCommand::Fail(FailWalletTransaction {
            tenant_id,
            transaction_id,
            reason: reason.to_string(),
            operator,
            occurred_at,
        });
        let transaction = self.transition(tenant_id, transaction_id, &command)?;
        tracing::warn!(tenant_id = %tenant_id, transaction_id = %transaction_id, reason, "wallet transaction failed");
        Ok(transaction)
    }

    /// Recognize the fee of `items` against the customer wallet. Items already
    /// recognized are skipped; if nothing is left this is a successful no-op.
    pub fn recognize_fees(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
        items: Vec<ItemId>,
        customer: UserId,
        rates: &RateSnapshot,
        occurred_at: DateTime<Utc>,
    ) -> Result<RecognitionOutcome, SettlementError> {
        let current = self
            .store
            .booking(tenant_id, booking_id)?
            .ok_or(SettlementError::BookingNotFound(booking_id))?;

        let mut seen = BTreeSet::new();
        for id in &items {
            if !seen.insert(*id) {
                continue;
            }
            let item = self
                .store
                .item(tenant_id, *id)?
                .ok_or(SettlementError::ItemNotFound(*id))?;
            if item.value.booking_id != booking_id {
                return Err(SettlementError::ItemNotInBooking {
                    item: *id,
                    booking: booking_id,
                });
            }
        }

        let request = PostingRequest {
            header: EntryHeader {
                entry_id: JournalEntryId::new(),
                tenant_id,
                occurred_at,
                description: format!("Fee recognition for booking {booking_id}"),
                reference: format!("FEE-{booking_id}"),
                branch_id: None,
                related_document_id: Some(booking_id.to_string()),
            },
            event: PostingEvent::FeeRecognition(FeeRecognition {
                currency: current.value.currency.clone(),
                booking: current.value.clone(),
                items,
            }),
        };

        let overrides = self.store.overrides(tenant_id, customer)?;
        let chart = self.store.chart(tenant_id)?;
        let posting = match JournalEntryBuilder::new(self.context(&chart, rates, &overrides)).build(&request) {
            Ok(posting) => posting,
            Err(PostingError::AlreadyRecognized) => {
                tracing::info!(tenant_id = %tenant_id, booking_id = %booking_id, "fees already recognized");
                return Ok(RecognitionOutcome::AlreadyRecognized);
            }
            Err(err) => return Err(err.into()),
        };

        let mut booking: Booking = current.value.clone();
        if let Some(recognized) = posting.recognized.get(&booking_id) {
            booking.recognized_items.extend(recognized.iter().copied());
        }
        let batch = WriteBatch::new()
            .append_entry(posting.entry.clone())
            .put_booking(booking, ExpectedVersion::Exact(current.version));

        match self.store.commit(tenant_id, batch) {
            Ok(()) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    booking_id = %booking_id,
                    entry_id = %posting.entry.id,
                    "fees recognized"
                );
                Ok(RecognitionOutcome::Posted(posting.entry))
            }
            Err(err) if err.is_concurrency() => {
                // A concurrent recognition won; only a no-op if it covered our items.
                let latest = self
                    .store
                    .booking(tenant_id, booking_id)?
                    .ok_or(SettlementError::BookingNotFound(booking_id))?;
                let ours: BTreeSet<ItemId> = posting.recognized.get(&booking_id).cloned().unwrap_or_default();
                if ours.iter().all(|i| latest.value.is_recognized(i)) {
                    Ok(RecognitionOutcome::AlreadyRecognized)
                } else {
                    Err(err.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Post a request that does not go through a wallet transaction
    /// (transfers, direct purchases).
    pub fn post(
        &self,
        request: &PostingRequest,
        overrides: &AccountOverrides,
        rates: &RateSnapshot,
    ) -> Result<JournalEntry, SettlementError> {
        let tenant_id = request.header.tenant_id;
        let chart = self.store.chart(tenant_id)?;
        let posting = JournalEntryBuilder::new(self.context(&chart, rates, overrides)).build(request)?;
        self.store
            .commit(tenant_id, WriteBatch::new().append_entry(posting.entry.clone()))?;
        Ok(posting.entry)
    }

    /// Offset a posted entry with its mirror image. Each entry can be reversed once.
    pub fn reverse(
        &self,
        tenant_id: TenantId,
        entry_id: JournalEntryId,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<JournalEntry, SettlementError> {
        let entries = self.store.journal_entries(tenant_id)?;
        let original = entries
            .iter()
            .find(|e| e.id == entry_id)
            .ok_or(SettlementError::EntryNotFound(entry_id))?;
        if entries.iter().any(|e| e.reversal_of == Some(entry_id)) {
            return Err(SettlementError::AlreadyReversed(entry_id));
        }

        let reversal = original.reversal(JournalEntryId::new(), occurred_at, reason);
        self.store
            .commit(tenant_id, WriteBatch::new().append_entry(reversal.clone()))?;
        tracing::info!(tenant_id = %tenant_id, entry_id = %entry_id, reversal_id = %reversal.id, "journal entry reversed");
        Ok(reversal)
    }

    pub fn account_balance(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        options: BalanceOptions,
    ) -> Result<AccountBalance, SettlementError> {
        let account = self
            .store
            .account(tenant_id, account_id)?
            .ok_or(SettlementError::AccountNotFound(account_id))?;
        let entries = self.store.journal_entries(tenant_id)?;
        Ok(balance(&account, &entries, options, &self.settings.base_currency))
    }

    pub fn trial_balance(
        &self,
        tenant_id: TenantId,
        options: BalanceOptions,
    ) -> Result<TrialBalance, SettlementError> {
        let chart = self.store.chart(tenant_id)?;
        let entries = self.store.journal_entries(tenant_id)?;
        Ok(trial_balance(&chart, &entries, options))
    }

    fn context<'a>(
        &'a self,
        chart: &'a ChartOfAccounts,
        rates: &'a RateSnapshot,
        overrides: &'a AccountOverrides,
    ) -> PostingContext<'a> {
        PostingContext {
            settings: &self.settings,
            chart,
            rates,
            resolver: &self.resolver,
            overrides,
        }
    }

    fn load_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
    ) -> Result<Versioned<WalletTransaction>, SettlementError> {
        self.store
            .wallet_transaction(tenant_id, transaction_id)?
            .ok_or(SettlementError::TransactionNotFound(transaction_id))
    }

    fn load_settlement(
        &self,
        tenant_id: TenantId,
        item_ids: &[ItemId],
    ) -> Result<LoadedSettlement, SettlementError> {
        let mut loaded = LoadedSettlement::default();

        for id in item_ids {
            let item = self
                .store
                .item(tenant_id, *id)?
                .ok_or(SettlementError::ItemNotFound(*id))?;
            if item.value.cleared {
                return Err(SettlementError::ItemAlreadyCleared(*id));
            }
            let booking_id = item.value.booking_id;
            if !loaded.booking_versions.contains_key(&booking_id) {
                let booking = self
                    .store
                    .booking(tenant_id, booking_id)?
                    .ok_or(SettlementError::BookingNotFound(booking_id))?;
                loaded.booking_versions.insert(booking_id, booking.version);
                loaded.documents.bookings.insert(booking_id, booking.value);
            }
            loaded.item_versions.insert(*id, item.version);
            loaded.documents.items.push(item.value);
        }

        Ok(loaded)
    }

    fn posting_inputs(
        &self,
        tenant_id: TenantId,
        transaction: &WalletTransaction,
        occurred_at: DateTime<Utc>,
    ) -> Result<PostingInputs, SettlementError> {
        let Some(req) = transaction.request() else {
            return Err(SettlementError::TransactionNotFound(*transaction.id()));
        };

        let loaded = if req.transaction_type == WalletTransactionType::Settlement {
            self.load_settlement(tenant_id, &req.related_items)?
        } else {
            LoadedSettlement::default()
        };
        let overrides = self.store.overrides(tenant_id, req.user_id)?;
        let request = transaction.posting_request(JournalEntryId::new(), occurred_at, loaded.documents.clone())?;

        Ok(PostingInputs {
            request,
            loaded,
            overrides,
        })
    }

    fn transition(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        command: &WalletTransactionCommand,
    ) -> Result<WalletTransaction, SettlementError> {
        let current = self.load_transaction(tenant_id, transaction_id)?;
        let mut transaction = current.value;
        let events = transaction.handle(command)?;
        for e in &events {
            transaction.apply(e);
        }

        let batch = WriteBatch::new()
            .put_wallet_transaction(transaction.clone(), ExpectedVersion::Exact(current.version))
            .append_events(records(&events)?);
        if let Err(err) = self.store.commit(tenant_id, batch) {
            return Err(self.explain_lost_race(tenant_id, transaction_id, err));
        }
        Ok(transaction)
    }

    /// A cleared item on a still-PENDING transaction belongs to another
    /// settlement; on a processed one it means this approval lost the race.
    fn explain_cleared_item(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        err: SettlementError,
    ) -> SettlementError {
        match self.store.wallet_transaction(tenant_id, transaction_id) {
            Ok(Some(latest)) if !latest.value.is_pending() => WalletError::AlreadyProcessed {
                id: transaction_id,
                status: latest.value.status(),
            }
            .into(),
            _ => err,
        }
    }

    /// A concurrency failure on commit usually means another approver moved
    /// the transaction first; report that as `AlreadyProcessed`.
    fn explain_lost_race(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
        err: StoreError,
    ) -> SettlementError {
        if !err.is_concurrency() {
            return err.into();
        }
        match self.store.wallet_transaction(tenant_id, transaction_id) {
            Ok(Some(latest)) if !latest.value.is_pending() => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    transaction_id = %transaction_id,
                    status = %latest.value.status(),
                    "lost concurrent approval"
                );
                WalletError::AlreadyProcessed {
                    id: transaction_id,
                    status: latest.value.status(),
                }
                .into()
            }
            _ => err.into(),
        }
    }
}

fn records(events: &[WalletTransactionEvent]) -> Result<Vec<EventRecord>, EventRecordError> {
    events.iter().map(EventRecord::from_event).collect()
}
