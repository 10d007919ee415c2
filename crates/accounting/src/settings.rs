//! Posting configuration: which ledger accounts play which role.
//!
//! Settings are an immutable value handed to every resolver and builder call.
//! Every table is optional; an empty table just lets resolution fall through
//! to the next level.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, ValueObject};

use crate::allocation::CommissionRule;
use crate::currency::Currency;

/// Well-known transaction roles a ledger account can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    SettlementBank,
    CustomerWallet,
    DriverWallet,
    DeliveryRevenue,
    ExpressRevenue,
    TaxPayable,
    CommissionExpense,
    CommissionPayable,
    PurchaseExpense,
    SalesReturns,
}

impl AccountRole {
    pub const ALL: [AccountRole; 10] = [
        AccountRole::SettlementBank,
        AccountRole::CustomerWallet,
        AccountRole::DriverWallet,
        AccountRole::DeliveryRevenue,
        AccountRole::ExpressRevenue,
        AccountRole::TaxPayable,
        AccountRole::CommissionExpense,
        AccountRole::CommissionPayable,
        AccountRole::PurchaseExpense,
        AccountRole::SalesReturns,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AccountRole::SettlementBank => "settlement bank",
            AccountRole::CustomerWallet => "customer wallet liability",
            AccountRole::DriverWallet => "driver wallet liability",
            AccountRole::DeliveryRevenue => "delivery revenue",
            AccountRole::ExpressRevenue => "express revenue",
            AccountRole::TaxPayable => "tax payable",
            AccountRole::CommissionExpense => "commission expense",
            AccountRole::CommissionPayable => "commission payable",
            AccountRole::PurchaseExpense => "purchase expense",
            AccountRole::SalesReturns => "sales returns",
        }
    }

    /// Chart code reserved for this role in the base currency.
    pub fn reserved_code(self) -> &'static str {
        match self {
            AccountRole::SettlementBank => "1010",
            AccountRole::CustomerWallet => "2010",
            AccountRole::DriverWallet => "2020",
            AccountRole::TaxPayable => "2100",
            AccountRole::CommissionPayable => "2200",
            AccountRole::DeliveryRevenue => "4010",
            AccountRole::ExpressRevenue => "4020",
            AccountRole::SalesReturns => "4900",
            AccountRole::CommissionExpense => "5010",
            AccountRole::PurchaseExpense => "5100",
        }
    }

    /// Reserved code for a role/currency pair: `1010` in the base currency,
    /// `1010-KHR` otherwise.
    pub fn reserved_code_for(self, currency: &Currency, base: &Currency) -> String {
        if currency == base {
            self.reserved_code().to_string()
        } else {
            format!("{}-{}", self.reserved_code(), currency)
        }
    }
}

impl ValueObject for AccountRole {}

impl core::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Role → account table, generic and per currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRoleMapping {
    #[serde(default)]
    pub generic: BTreeMap<AccountRole, AccountId>,
    #[serde(default)]
    pub by_currency: BTreeMap<Currency, BTreeMap<AccountRole, AccountId>>,
}

impl AccountRoleMapping {
    pub fn generic(&self, role: AccountRole) -> Option<AccountId> {
        self.generic.get(&role).copied()
    }

    pub fn for_currency(&self, role: AccountRole, currency: &Currency) -> Option<AccountId> {
        self.by_currency.get(currency)?.get(&role).copied()
    }

    pub fn set_generic(&mut self, role: AccountRole, account: AccountId) {
        self.generic.insert(role, account);
    }

    pub fn set_for_currency(&mut self, role: AccountRole, currency: Currency, account: AccountId) {
        self.by_currency.entry(currency).or_default().insert(role, account);
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: AccountRole,
    /// `None` applies to every currency.
    #[serde(default)]
    pub currency: Option<Currency>,
    pub account_id: AccountId,
}

/// Small integer-keyed table of role overrides; the lowest matching key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable(BTreeMap<u32, RoleRule>);

impl RuleTable {
    pub fn insert(&mut self, key: u32, rule: RoleRule) {
        self.0.insert(key, rule);
    }

    pub fn lookup(&self, role: AccountRole, currency: &Currency) -> Option<AccountId> {
        self.0
            .values()
            .find(|r| r.role == role && r.currency.as_ref().is_none_or(|c| c == currency))
            .map(|r| r.account_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-entity overrides (e.g. a user's own wallet account).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountOverrides(BTreeMap<AccountRole, AccountId>);

impl AccountOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: AccountRole, account: AccountId) -> Self {
        self.0.insert(role, account);
        self
    }

    pub fn get(&self, role: AccountRole) -> Option<AccountId> {
        self.0.get(&role).copied()
    }

    /// `other` wins where both name the same role.
    pub fn merged(&self, other: &AccountOverrides) -> AccountOverrides {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (*k, *v)));
        AccountOverrides(merged)
    }
}

/// Everything the posting core needs to know about a tenant's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingSettings {
    pub base_currency: Currency,
    #[serde(default)]
    pub roles: AccountRoleMapping,
    #[serde(default)]
    pub rule_table: RuleTable,
    #[serde(default)]
    pub commission_rules: Vec<CommissionRule>,
}

impl PostingSettings {
    pub fn new(base_currency: Currency) -> Self {
        Self {
            base_currency,
            roles: AccountRoleMapping::default(),
            rule_table: RuleTable::default(),
            commission_rules: Vec::new(),
        }
    }
}
