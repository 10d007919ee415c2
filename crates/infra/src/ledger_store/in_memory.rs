use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use ledgerflow_accounting::{Account, AccountOverrides, Booking, BookingItem, JournalEntry};
use ledgerflow_core::{
    AccountId, AggregateRoot, BookingId, ExpectedVersion, ItemId, JournalEntryId, TenantId,
    UserId, WalletTransactionId,
};
use ledgerflow_events::EventRecord;
use ledgerflow_wallet::WalletTransaction;

use super::r#trait::{LedgerStore, StoreError, Versioned, WriteBatch, WriteOp};

#[derive(Debug, Default)]
struct TenantBooks {
    accounts: BTreeMap<AccountId, Account>,
    overrides: HashMap<UserId, AccountOverrides>,
    entries: Vec<JournalEntry>,
    entry_ids: HashSet<JournalEntryId>,
    wallet_transactions: HashMap<WalletTransactionId, Versioned<WalletTransaction>>,
    bookings: HashMap<BookingId, Versioned<Booking>>,
    items: HashMap<ItemId, Versioned<BookingItem>>,
    events: Vec<EventRecord>,
}

fn check_version<K: core::fmt::Display>(
    kind: &str,
    id: K,
    expected: ExpectedVersion,
    actual: Option<u64>,
) -> Result<(), StoreError> {
    if expected.matches(actual) {
        return Ok(());
    }
    Err(StoreError::Concurrency {
        document: format!("{kind} {id}"),
        detail: format!("expected {expected:?}, found {actual:?}"),
    })
}

fn bump<T>(slot: Option<&Versioned<T>>) -> u64 {
    slot.map(|v| v.version).unwrap_or(0) + 1
}

impl TenantBooks {
    /// Every precondition of the batch, checked against the current state
    /// before anything is written.
    fn validate(&self, tenant_id: TenantId, ops: &[WriteOp]) -> Result<(), StoreError> {
        let mut touched: HashSet<String> = HashSet::new();
        let mut codes: HashMap<&str, AccountId> =
            self.accounts.values().map(|a| (a.code.as_str(), a.id)).collect();

        for op in ops {
            let key = match op {
                WriteOp::PutAccount(account) => {
                    if let Some(owner) = codes.insert(account.code.as_str(), account.id) {
                        if owner != account.id {
                            return Err(StoreError::InvalidBatch(format!(
                                "account code {} is already used by {owner}",
                                account.code
                            )));
                        }
                    }
                    format!("account {}", account.id)
                }
                WriteOp::PutOverrides { user_id, .. } => format!("overrides {user_id}"),
                WriteOp::AppendJournalEntry(entry) => {
                    if entry.tenant_id != tenant_id {
                        return Err(StoreError::TenantIsolation(format!(
                            "journal entry {} belongs to another tenant",
                            entry.id
                        )));
                    }
                    if self.entry_ids.contains(&entry.id) {
                        return Err(StoreError::DuplicateEntry(entry.id));
                    }
                    format!("journal entry {}", entry.id)
                }
                WriteOp::PutWalletTransaction { transaction, expected } => {
                    if transaction.tenant_id().is_some_and(|t| t != tenant_id) {
                        return Err(StoreError::TenantIsolation(format!(
                            "wallet transaction {} belongs to another tenant",
                            transaction.id()
                        )));
                    }
                    let current = self.wallet_transactions.get(transaction.id()).map(|v| v.version);
                    check_version("wallet transaction", transaction.id(), *expected, current)?;
                    format!("wallet transaction {}", transaction.id())
                }
                WriteOp::PutBooking { booking, expected } => {
                    let current = self.bookings.get(&booking.id).map(|v| v.version);
                    check_version("booking", booking.id, *expected, current)?;
                    format!("booking {}", booking.id)
                }
                WriteOp::PutItem { item, expected } => {
                    let current = self.items.get(&item.id).map(|v| v.version);
                    check_version("item", item.id, *expected, current)?;
                    format!("item {}", item.id)
                }
                WriteOp::AppendEvent(record) => {
                    if record.tenant_id != tenant_id {
                        return Err(StoreError::TenantIsolation(format!(
                            "event {} belongs to another tenant",
                            record.event_id
                        )));
                    }
                    continue;
                }
            };

            if !touched.insert(key.clone()) {
                return Err(StoreError::InvalidBatch(format!("{key} is written twice")));
            }
        }

        Ok(())
    }

    fn apply(&mut self, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::PutAccount(account) => {
                    self.accounts.insert(account.id, account);
                }
                WriteOp::PutOverrides { user_id, overrides } => {
                    self.overrides.insert(user_id, overrides);
                }
                WriteOp::AppendJournalEntry(entry) => {
                    self.entry_ids.insert(entry.id);
                    self.entries.push(entry);
                }
                WriteOp::PutWalletTransaction { transaction, .. } => {
                    let id = *transaction.id();
                    let version = bump(self.wallet_transactions.get(&id));
                    self.wallet_transactions.insert(id, Versioned { value: transaction, version });
                }
                WriteOp::PutBooking { booking, .. } => {
                    let version = bump(self.bookings.get(&booking.id));
                    self.bookings.insert(booking.id, Versioned { value: booking, version });
                }
                WriteOp::PutItem { item, .. } => {
                    let version = bump(self.items.get(&item.id));
                    self.items.insert(item.id, Versioned { value: item, version });
                }
                WriteOp::AppendEvent(record) => self.events.push(record),
            }
        }
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. One write lock covers validation and application
/// of a whole batch.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tenants: RwLock<HashMap<TenantId, TenantBooks>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, tenant_id: TenantId, f: impl FnOnce(&TenantBooks) -> T) -> Result<T, StoreError>
    where
        T: Default,
    {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(tenants.get(&tenant_id).map(f).unwrap_or_default())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError> {
        self.read(tenant_id, |books| books.accounts.values().cloned().collect())
    }

    fn account(&self, tenant_id: TenantId, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.read(tenant_id, |books| books.accounts.get(&id).cloned())
    }

    fn overrides(&self, tenant_id: TenantId, user_id: UserId) -> Result<AccountOverrides, StoreError> {
        self.read(tenant_id, |books| books.overrides.get(&user_id).cloned().unwrap_or_default())
    }

    fn wallet_transaction(
        &self,
        tenant_id: TenantId,
        id: WalletTransactionId,
    ) -> Result<Option<Versioned<WalletTransaction>>, StoreError> {
        self.read(tenant_id, |books| books.wallet_transactions.get(&id).cloned())
    }

    fn booking(&self, tenant_id: TenantId, id: BookingId) -> Result<Option<Versioned<Booking>>, StoreError> {
        self.read(tenant_id, |books| books.bookings.get(&id).cloned())
    }

    fn item(&self, tenant_id: TenantId, id: ItemId) -> Result<Option<Versioned<BookingItem>>, StoreError> {
        self.read(tenant_id, |books| books.items.get(&id).cloned())
    }

    fn journal_entry(&self, tenant_id: TenantId, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        self.read(tenant_id, |books| books.entries.iter().find(|e| e.id == id).cloned())
    }

    fn journal_entries(&self, tenant_id: TenantId) -> Result<Vec<JournalEntry>, StoreError> {
        self.read(tenant_id, |books| books.entries.clone())
    }

    fn events(&self, tenant_id: TenantId) -> Result<Vec<EventRecord>, StoreError> {
        self.read(tenant_id, |books| books.events.clone())
    }

    fn commit(&self, tenant_id: TenantId, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let books = tenants.entry(tenant_id).or_default();

        books.validate(tenant_id, batch.ops())?;
        books.apply(batch.into_ops());
        Ok(())
    }
}
