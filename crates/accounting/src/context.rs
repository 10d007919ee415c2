use ledgerflow_core::AccountId;

use crate::account::ChartOfAccounts;
use crate::currency::{Currency, RateSnapshot};
use crate::error::PostingResult;
use crate::resolver::AccountResolver;
use crate::settings::{AccountOverrides, AccountRole, PostingSettings};

/// Read-only inputs of one posting: configuration, chart, rates and the
/// requesting entity's overrides. Nothing is read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct PostingContext<'a> {
    pub settings: &'a PostingSettings,
    pub chart: &'a ChartOfAccounts,
    pub rates: &'a RateSnapshot,
    pub resolver: &'a AccountResolver,
    pub overrides: &'a AccountOverrides,
}

impl<'a> PostingContext<'a> {
    pub fn base_currency(&self) -> &'a Currency {
        &self.settings.base_currency
    }

    pub fn resolve(&self, role: AccountRole, currency: &Currency) -> PostingResult<AccountId> {
        self.resolver
            .resolve(role, currency, self.overrides, self.settings, self.chart)
    }

    /// Same as [`resolve`](Self::resolve) but with one extra override in front
    /// (e.g. the bank account named on the request).
    pub fn resolve_preferring(
        &self,
        preferred: Option<AccountId>,
        role: AccountRole,
        currency: &Currency,
    ) -> PostingResult<AccountId> {
        match preferred {
            Some(account) => Ok(account),
            None => self.resolve(role, currency),
        }
    }
}
