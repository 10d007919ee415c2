use std::sync::Arc;

use thiserror::Error;

use ledgerflow_accounting::{Account, AccountOverrides, Booking, BookingItem, ChartOfAccounts, JournalEntry};
use ledgerflow_core::{
    AccountId, BookingId, ExpectedVersion, ItemId, JournalEntryId, TenantId, UserId,
    WalletTransactionId,
};
use ledgerflow_events::EventRecord;
use ledgerflow_wallet::WalletTransaction;

/// A stored document together with its store-assigned version.
///
/// Versions start at 1 on first write and grow by one per write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutAccount(Account),
    PutOverrides {
        user_id: UserId,
        overrides: AccountOverrides,
    },
    /// Append-only; an entry id that already exists fails the batch.
    AppendJournalEntry(JournalEntry),
    PutWalletTransaction {
        transaction: WalletTransaction,
        expected: ExpectedVersion,
    },
    PutBooking {
        booking: Booking,
        expected: ExpectedVersion,
    },
    PutItem {
        item: BookingItem,
        expected: ExpectedVersion,
    },
    AppendEvent(EventRecord),
}

/// Builder for an atomic multi-document commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_account(mut self, account: Account) -> Self {
        self.ops.push(WriteOp::PutAccount(account));
        self
    }

    pub fn put_overrides(mut self, user_id: UserId, overrides: AccountOverrides) -> Self {
        self.ops.push(WriteOp::PutOverrides { user_id, overrides });
        self
    }

    pub fn append_entry(mut self, entry: JournalEntry) -> Self {
        self.ops.push(WriteOp::AppendJournalEntry(entry));
        self
    }

    pub fn put_wallet_transaction(mut self, transaction: WalletTransaction, expected: ExpectedVersion) -> Self {
        self.ops.push(WriteOp::PutWalletTransaction { transaction, expected });
        self
    }

    pub fn put_booking(mut self, booking: Booking, expected: ExpectedVersion) -> Self {
        self.ops.push(WriteOp::PutBooking { booking, expected });
        self
    }

    pub fn put_item(mut self, item: BookingItem, expected: ExpectedVersion) -> Self {
        self.ops.push(WriteOp::PutItem { item, expected });
        self
    }

    pub fn append_events(mut self, records: impl IntoIterator<Item = EventRecord>) -> Self {
        self.ops.extend(records.into_iter().map(WriteOp::AppendEvent));
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Ledger store operation error.
///
/// Infrastructure failures only; posting and wallet rules report through their
/// own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed for {document}: {detail}")]
    Concurrency { document: String, detail: String },

    #[error("journal entry {0} already exists")]
    DuplicateEntry(JournalEntryId),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, StoreError::Concurrency { .. })
    }
}

/// Tenant-scoped persistence boundary of the posting engine.
///
/// Implementations must:
/// - key every document by `(tenant_id, document id)`
/// - validate every precondition of a batch before applying any of it
/// - reject duplicate journal entry ids (entries are append-only)
pub trait LedgerStore: Send + Sync {
    fn accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError>;

    fn account(&self, tenant_id: TenantId, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn overrides(&self, tenant_id: TenantId, user_id: UserId) -> Result<AccountOverrides, StoreError>;

    fn wallet_transaction(
        &self,
        tenant_id: TenantId,
        id: WalletTransactionId,
    ) -> Result<Option<Versioned<WalletTransaction>>, StoreError>;

    fn booking(&self, tenant_id: TenantId, id: BookingId) -> Result<Option<Versioned<Booking>>, StoreError>;

    fn item(&self, tenant_id: TenantId, id: ItemId) -> Result<Option<Versioned<BookingItem>>, StoreError>;

    fn journal_entry(&self, tenant_id: TenantId, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError>;

    /// All entries of a tenant in commit order.
    fn journal_entries(&self, tenant_id: TenantId) -> Result<Vec<JournalEntry>, StoreError>;

    /// Audit records of a tenant in commit order.
    fn events(&self, tenant_id: TenantId) -> Result<Vec<EventRecord>, StoreError>;

    fn commit(&self, tenant_id: TenantId, batch: WriteBatch) -> Result<(), StoreError>;

    /// The tenant's chart of accounts.
    fn chart(&self, tenant_id: TenantId) -> Result<ChartOfAccounts, StoreError> {
        ChartOfAccounts::new(self.accounts(tenant_id)?).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError> {
        (**self).accounts(tenant_id)
    }

    fn account(&self, tenant_id: TenantId, id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).account(tenant_id, id)
    }

    fn overrides(&self, tenant_id: TenantId, user_id: UserId) -> Result<AccountOverrides, StoreError> {
        (**self).overrides(tenant_id, user_id)
    }

    fn wallet_transaction(
        &self,
        tenant_id: TenantId,
        id: WalletTransactionId,
    ) -> Result<Option<Versioned<WalletTransaction>>, StoreError> {
        (**self).wallet_transaction(tenant_id, id)
    }

    fn booking(&self, tenant_id: TenantId, id: BookingId) -> Result<Option<Versioned<Booking>>, StoreError> {
        (**self).booking(tenant_id, id)
    }

    fn item(&self, tenant_id: TenantId, id: ItemId) -> Result<Option<Versioned<BookingItem>>, StoreError> {
        (**self).item(tenant_id, id)
    }

    fn journal_entry(&self, tenant_id: TenantId, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        (**self).journal_entry(tenant_id, id)
    }

    fn journal_entries(&self, tenant_id: TenantId) -> Result<Vec<JournalEntry>, StoreError> {
        (**self).journal_entries(tenant_id)
    }

    fn events(&self, tenant_id: TenantId) -> Result<Vec<EventRecord>, StoreError> {
        (**self).events(tenant_id)
    }

    fn commit(&self, tenant_id: TenantId, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).commit(tenant_id, batch)
    }
}
