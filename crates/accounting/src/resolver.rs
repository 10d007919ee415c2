//! Account resolution: role + currency → ledger account.
//!
//! Resolution walks an ordered list of steps and stops at the first one that
//! yields an account. The standard chain is:
//!
//! 1. per-entity override
//! 2. rule table
//! 3. currency-specific setting
//! 4. generic setting
//! 5. reserved chart code for the role/currency pair
//!
//! New levels are added by inserting a step; call sites never change.

use ledgerflow_core::AccountId;

use crate::account::ChartOfAccounts;
use crate::currency::Currency;
use crate::error::{PostingError, PostingResult};
use crate::settings::{AccountOverrides, AccountRole, PostingSettings};

/// Inputs visible to every resolution step.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionRequest<'a> {
    pub role: AccountRole,
    pub currency: &'a Currency,
    pub overrides: &'a AccountOverrides,
    pub settings: &'a PostingSettings,
    pub chart: &'a ChartOfAccounts,
}

/// One level of the precedence chain.
pub trait ResolutionStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<AccountId>;
}

struct EntityOverride;

impl ResolutionStep for EntityOverride {
    fn name(&self) -> &'static str {
        "entity_override"
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<AccountId> {
        request.overrides.get(request.role)
    }
}

struct RuleTableEntry;

impl ResolutionStep for RuleTableEntry {
    fn name(&self) -> &'static str {
        "rule_table"
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<AccountId> {
        request.settings.rule_table.lookup(request.role, request.currency)
    }
}

struct CurrencySetting;

impl ResolutionStep for CurrencySetting {
    fn name(&self) -> &'static str {
        "currency_setting"
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<AccountId> {
        request.settings.roles.for_currency(request.role, request.currency)
    }
}

struct GenericSetting;

impl ResolutionStep for GenericSetting {
    fn name(&self) -> &'static str {
        "generic_setting"
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<AccountId> {
        request.settings.roles.generic(request.role)
    }
}

struct ReservedChartCode;

impl ResolutionStep for ReservedChartCode {
    fn name(&self) -> &'static str {
        "reserved_chart_code"
    }

    fn resolve(&self, request: &ResolutionRequest<'_>) -> Option<AccountId> {
        let code = request
            .role
            .reserved_code_for(request.currency, &request.settings.base_currency);
        request
            .chart
            .by_code(&code)
            .filter(|a| !a.is_header)
            .map(|a| a.id)
    }
}

/// Ordered precedence chain of resolution steps.
pub struct AccountResolver {
    steps: Vec<Box<dyn ResolutionStep>>,
}

impl core::fmt::Debug for AccountResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.step_names()).finish()
    }
}

impl Default for AccountResolver {
    fn default() -> Self {
        Self::standard()
    }
}

impl AccountResolver {
    pub fn standard() -> Self {
        Self {
            steps: vec![
                Box::new(EntityOverride),
                Box::new(RuleTableEntry),
                Box::new(CurrencySetting),
                Box::new(GenericSetting),
                Box::new(ReservedChartCode),
            ],
        }
    }

    /// Insert an extra level at `position` (clamped to the end of the chain).
    pub fn with_step(mut self, position: usize, step: Box<dyn ResolutionStep>) -> Self {
        let position = position.min(self.steps.len());
        self.steps.insert(position, step);
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn resolve(
        &self,
        role: AccountRole,
        currency: &Currency,
        overrides: &AccountOverrides,
        settings: &PostingSettings,
        chart: &ChartOfAccounts,
    ) -> PostingResult<AccountId> {
        let request = ResolutionRequest {
            role,
            currency,
            overrides,
            settings,
            chart,
        };

        for step in &self.steps {
            if let Some(account) = step.resolve(&request) {
                tracing::debug!(%role, %currency, step = step.name(), %account, "resolved account role");
                return Ok(account);
            }
        }

        Err(PostingError::UnconfiguredAccountRole {
            role,
            currency: currency.clone(),
        })
    }
}
