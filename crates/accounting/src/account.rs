use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, Entity};

use crate::currency::Currency;
use crate::error::{PostingError, PostingResult};
use crate::journal::Side;

/// High-level account type (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn normal_side(self) -> Side {
        match self {
            AccountType::Asset | AccountType::Expense => Side::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => Side::Credit,
        }
    }
}

/// Chart-of-accounts entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Stable, unique chart code (e.g. "1010" or "1010-KHR").
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub sub_type: Option<String>,
    /// `None` means the account is kept in the base currency.
    #[serde(default)]
    pub currency: Option<Currency>,
    /// Aggregation node; never posted to.
    #[serde(default)]
    pub is_header: bool,
}

impl Account {
    pub fn new(code: impl Into<String>, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: AccountId::new(),
            code: code.into(),
            name: name.into(),
            account_type,
            sub_type: None,
            currency: None,
            is_header: false,
        }
    }

    pub fn in_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn header(mut self) -> Self {
        self.is_header = true;
        self
    }

    /// Currency the account's native balance is kept in.
    pub fn effective_currency<'a>(&'a self, base: &'a Currency) -> &'a Currency {
        self.currency.as_ref().unwrap_or(base)
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A tenant's accounts, indexed by id and by code.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    accounts: Vec<Account>,
    by_id: HashMap<AccountId, usize>,
    by_code: HashMap<String, usize>,
}

impl ChartOfAccounts {
    /// Build a chart, rejecting duplicate ids or codes.
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> PostingResult<Self> {
        let mut chart = Self::default();
        for account in accounts {
            if chart.by_id.contains_key(&account.id) {
                return Err(PostingError::InvalidChart(format!(
                    "duplicate account id {}",
                    account.id
                )));
            }
            if chart.by_code.contains_key(&account.code) {
                return Err(PostingError::InvalidChart(format!(
                    "duplicate account code {}",
                    account.code
                )));
            }
            let idx = chart.accounts.len();
            chart.by_id.insert(account.id, idx);
            chart.by_code.insert(account.code.clone(), idx);
            chart.accounts.push(account);
        }
        Ok(chart)
    }

    pub fn get(&self, id: &AccountId) -> Option<&Account> {
        self.by_id.get(id).map(|&i| &self.accounts[i])
    }

    pub fn by_code(&self, code: &str) -> Option<&Account> {
        self.by_code.get(code).map(|&i| &self.accounts[i])
    }

    /// Look up an account that journal lines may reference.
    pub fn postable(&self, id: &AccountId) -> PostingResult<&Account> {
        let account = self.get(id).ok_or(PostingError::UnknownAccount(*id))?;
        if account.is_header {
            return Err(PostingError::HeaderAccount(*id));
        }
        Ok(account)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
