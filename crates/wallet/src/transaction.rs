use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerflow_accounting::{
    Booking, BookingItem, CashMovement, Currency, EntryHeader, PostingEvent, PostingRequest,
    SettlementPosting, WalletCredit, WalletKind,
};
use ledgerflow_core::{
    AccountId, Aggregate, AggregateRoot, BookingId, BranchId, DomainError, ItemId, JournalEntryId,
    TenantId, UserId, WalletTransactionId,
};
use ledgerflow_events::Event;

use crate::error::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletTransactionType {
    Deposit,
    Withdrawal,
    Settlement,
    Earning,
    Refund,
}

impl WalletTransactionType {
    /// Wallet a type is pinned to, if any. Deposits and withdrawals may move
    /// either wallet.
    fn fixed_wallet(self) -> Option<WalletKind> {
        match self {
            WalletTransactionType::Deposit | WalletTransactionType::Withdrawal => None,
            WalletTransactionType::Settlement | WalletTransactionType::Refund => {
                Some(WalletKind::Customer)
            }
            WalletTransactionType::Earning => Some(WalletKind::Driver),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Pending,
    Approved,
    Rejected,
    Failed,
}

impl core::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            WalletStatus::Pending => "PENDING",
            WalletStatus::Approved => "APPROVED",
            WalletStatus::Rejected => "REJECTED",
            WalletStatus::Failed => "FAILED",
        })
    }
}

fn customer_wallet() -> WalletKind {
    WalletKind::Customer
}

/// Posting request as submitted by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWalletTransaction {
    #[serde(rename = "type")]
    pub transaction_type: WalletTransactionType,
    pub user_id: UserId,
    #[serde(default = "customer_wallet")]
    pub wallet: WalletKind,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(default)]
    pub bank_account_id: Option<AccountId>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub related_items: Vec<ItemId>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Items and bookings a settlement clears, loaded by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementDocuments {
    pub items: Vec<BookingItem>,
    pub bookings: BTreeMap<BookingId, Booking>,
}

/// Aggregate root: WalletTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    id: WalletTransactionId,
    tenant_id: Option<TenantId>,
    request: Option<NewWalletTransaction>,
    status: WalletStatus,
    journal_entry_id: Option<JournalEntryId>,
    rejection_reason: Option<String>,
    processed_by: Option<UserId>,
    processed_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
}

impl WalletTransaction {
    pub fn empty(id: WalletTransactionId) -> Self {
        Self {
            id,
            tenant_id: None,
            request: None,
            status: WalletStatus::Pending,
            journal_entry_id: None,
            rejection_reason: None,
            processed_by: None,
            processed_at: None,
            created_at: None,
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn request(&self) -> Option<&NewWalletTransaction> {
        self.request.as_ref()
    }

    pub fn status(&self) -> WalletStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.request.is_some() && self.status == WalletStatus::Pending
    }

    pub fn journal_entry_id(&self) -> Option<JournalEntryId> {
        self.journal_entry_id
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn processed_by(&self) -> Option<UserId> {
        self.processed_by
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Posting request for this transaction. Settlements need the items they
    /// clear; other types ignore `documents`.
    pub fn posting_request(
        &self,
        entry_id: JournalEntryId,
        occurred_at: DateTime<Utc>,
        documents: SettlementDocuments,
    ) -> Result<PostingRequest, WalletError> {
        let (Some(tenant_id), Some(req)) = (self.tenant_id, self.request.as_ref()) else {
            return Err(DomainError::uninitialized("wallet transaction").into());
        };

        let event = match req.transaction_type {
            WalletTransactionType::Deposit => PostingEvent::Deposit(self.cash_movement(req)),
            WalletTransactionType::Withdrawal => PostingEvent::Withdrawal(self.cash_movement(req)),
            WalletTransactionType::Settlement => {
                if documents.items.len() != req.related_items.len() {
                    return Err(DomainError::invariant(format!(
                        "settlement names {} items but {} were loaded",
                        req.related_items.len(),
                        documents.items.len()
                    ))
                    .into());
                }
                PostingEvent::Settlement(SettlementPosting {
                    cash_collected: req.amount,
                    currency: req.currency.clone(),
                    bank_account_id: req.bank_account_id,
                    items: documents.items,
                    bookings: documents.bookings,
                })
            }
            WalletTransactionType::Earning => PostingEvent::Earning(WalletCredit {
                amount: req.amount,
                currency: req.currency.clone(),
            }),
            WalletTransactionType::Refund => PostingEvent::Refund(WalletCredit {
                amount: req.amount,
                currency: req.currency.clone(),
            }),
        };

        let description = req.description.clone().unwrap_or_else(|| {
            format!("Wallet {:?} {}", req.transaction_type, self.id).to_lowercase()
        });

        Ok(PostingRequest {
            header: EntryHeader {
                entry_id,
                tenant_id,
                occurred_at,
                description,
                reference: format!("WT-{}", self.id),
                branch_id: req.branch_id,
                related_document_id: Some(self.id.to_string()),
            },
            event,
        })
    }

    fn cash_movement(&self, req: &NewWalletTransaction) -> CashMovement {
        CashMovement {
            amount: req.amount,
            currency: req.currency.clone(),
            wallet: req.wallet,
            bank_account_id: req.bank_account_id,
        }
    }
}

impl AggregateRoot for WalletTransaction {
    type Id = WalletTransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: submit a new transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWalletTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub request: NewWalletTransaction,
    pub occurred_at: DateTime<Utc>,
}

/// Command: approve after the journal entry has been built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveWalletTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub journal_entry_id: JournalEntryId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectWalletTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub reason: String,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: give up on a transaction that can never be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailWalletTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub reason: String,
    pub operator: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTransactionCommand {
    Request(RequestWalletTransaction),
    Approve(ApproveWalletTransaction),
    Reject(RejectWalletTransaction),
    Fail(FailWalletTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransactionRequested {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub request: NewWalletTransaction,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransactionApproved {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub journal_entry_id: JournalEntryId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransactionRejected {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub reason: String,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransactionFailed {
    pub tenant_id: TenantId,
    pub transaction_id: WalletTransactionId,
    pub reason: String,
    pub operator: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTransactionEvent {
    Requested(WalletTransactionRequested),
    Approved(WalletTransactionApproved),
    Rejected(WalletTransactionRejected),
    Failed(WalletTransactionFailed),
}

impl Event for WalletTransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WalletTransactionEvent::Requested(_) => "wallet.transaction.requested",
            WalletTransactionEvent::Approved(_) => "wallet.transaction.approved",
            WalletTransactionEvent::Rejected(_) => "wallet.transaction.rejected",
            WalletTransactionEvent::Failed(_) => "wallet.transaction.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WalletTransactionEvent::Requested(e) => e.occurred_at,
            WalletTransactionEvent::Approved(e) => e.occurred_at,
            WalletTransactionEvent::Rejected(e) => e.occurred_at,
            WalletTransactionEvent::Failed(e) => e.occurred_at,
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            WalletTransactionEvent::Requested(e) => e.tenant_id,
            WalletTransactionEvent::Approved(e) => e.tenant_id,
            WalletTransactionEvent::Rejected(e) => e.tenant_id,
            WalletTransactionEvent::Failed(e) => e.tenant_id,
        }
    }

    fn subject(&self) -> String {
        let id = match self {
            WalletTransactionEvent::Requested(e) => e.transaction_id,
            WalletTransactionEvent::Approved(e) => e.transaction_id,
            WalletTransactionEvent::Rejected(e) => e.transaction_id,
            WalletTransactionEvent::Failed(e) => e.transaction_id,
        };
        id.to_string()
    }
}

impl Aggregate for WalletTransaction {
    type Command = WalletTransactionCommand;
    type Event = WalletTransactionEvent;
    type Error = WalletError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WalletTransactionEvent::Requested(e) => {
                self.id = e.transaction_id;
                self.tenant_id = Some(e.tenant_id);
                self.request = Some(e.request.clone());
                self.status = WalletStatus::Pending;
                self.created_at = Some(e.occurred_at);
            }
            WalletTransactionEvent::Approved(e) => {
                self.status = WalletStatus::Approved;
                self.journal_entry_id = Some(e.journal_entry_id);
                self.processed_by = Some(e.approver);
                self.processed_at = Some(e.occurred_at);
            }
            WalletTransactionEvent::Rejected(e) => {
                self.status = WalletStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
                self.processed_by = Some(e.approver);
                self.processed_at = Some(e.occurred_at);
            }
            WalletTransactionEvent::Failed(e) => {
                self.status = WalletStatus::Failed;
                self.rejection_reason = Some(e.reason.clone());
                self.processed_by = Some(e.operator);
                self.processed_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WalletTransactionCommand::Request(cmd) => self.handle_request(cmd),
            WalletTransactionCommand::Approve(cmd) => self.handle_approve(cmd),
            WalletTransactionCommand::Reject(cmd) => self.handle_reject(cmd),
            WalletTransactionCommand::Fail(cmd) => self.handle_fail(cmd),
        }
    }
}

impl WalletTransaction {
    fn ensure_pending(
        &self,
        tenant_id: TenantId,
        transaction_id: WalletTransactionId,
    ) -> Result<(), WalletError> {
        if self.request.is_none() {
            return Err(DomainError::uninitialized("wallet transaction").into());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch").into());
        }
        if self.id != transaction_id {
            return Err(DomainError::invariant("transaction_id mismatch").into());
        }
        if self.status != WalletStatus::Pending {
            return Err(WalletError::AlreadyProcessed {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn handle_request(
        &self,
        cmd: &RequestWalletTransaction,
    ) -> Result<Vec<WalletTransactionEvent>, WalletError> {
        if self.request.is_some() {
            return Err(DomainError::conflict("wallet transaction already exists").into());
        }

        let req = &cmd.request;
        if req.amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive").into());
        }
        if let Some(wallet) = req.transaction_type.fixed_wallet() {
            if wallet != req.wallet {
                return Err(DomainError::validation(format!(
                    "{:?} transactions always move the {:?} wallet",
                    req.transaction_type, wallet
                ))
                .into());
            }
        }
        let is_settlement = req.transaction_type == WalletTransactionType::Settlement;
        if is_settlement && req.related_items.is_empty() {
            return Err(DomainError::validation("a settlement must name the items it clears").into());
        }
        if !is_settlement && !req.related_items.is_empty() {
            return Err(DomainError::validation("only settlements clear items").into());
        }
        let mut seen = BTreeSet::new();
        if !req.related_items.iter().all(|id| seen.insert(*id)) {
            return Err(DomainError::validation("related items must not repeat").into());
        }

        Ok(vec![WalletTransactionEvent::Requested(WalletTransactionRequested {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            request: cmd.request.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(
        &self,
        cmd: &ApproveWalletTransaction,
    ) -> Result<Vec<WalletTransactionEvent>, WalletError> {
        self.ensure_pending(cmd.tenant_id, cmd.transaction_id)?;

        Ok(vec![WalletTransactionEvent::Approved(WalletTransactionApproved {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            journal_entry_id: cmd.journal_entry_id,
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(
        &self,
        cmd: &RejectWalletTransaction,
    ) -> Result<Vec<WalletTransactionEvent>, WalletError> {
        self.ensure_pending(cmd.tenant_id, cmd.transaction_id)?;

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(WalletError::MissingRejectionReason);
        }

        Ok(vec![WalletTransactionEvent::Rejected(WalletTransactionRejected {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            reason: reason.to_string(),
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail(
        &self,
        cmd: &FailWalletTransaction,
    ) -> Result<Vec<WalletTransactionEvent>, WalletError> {
        self.ensure_pending(cmd.tenant_id, cmd.transaction_id)?;

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(WalletError::MissingRejectionReason);
        }

        Ok(vec![WalletTransactionEvent::Failed(WalletTransactionFailed {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            reason: reason.to_string(),
            operator: cmd.operator,
            occurred_at: cmd.occurred_at,
        })])
    }
}
