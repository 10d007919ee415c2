//! Configuration loading.
//!
//! - `LEDGERFLOW_SETTINGS`: path to a JSON `PostingSettings` document
//! - `LEDGERFLOW_BASE_CURRENCY`: base currency when no settings file is given
//!   (default `USD`); must agree with the file when both are set

use std::path::Path;

use anyhow::{Context, Result, bail};

use ledgerflow_accounting::{Currency, PostingSettings};

pub const SETTINGS_ENV: &str = "LEDGERFLOW_SETTINGS";
pub const BASE_CURRENCY_ENV: &str = "LEDGERFLOW_BASE_CURRENCY";
const DEFAULT_BASE_CURRENCY: &str = "USD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub settings: PostingSettings,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = lookup(BASE_CURRENCY_ENV)
            .map(Currency::new)
            .transpose()
            .with_context(|| format!("{BASE_CURRENCY_ENV} is not a currency code"))?;

        let Some(path) = lookup(SETTINGS_ENV) else {
            let base = match base {
                Some(base) => base,
                None => Currency::new(DEFAULT_BASE_CURRENCY)?,
            };
            tracing::info!(base_currency = %base, "no settings file configured; using empty posting settings");
            return Ok(Self {
                settings: PostingSettings::new(base),
            });
        };

        let config = Self::from_file(&path)?;
        if let Some(base) = base {
            if base != config.settings.base_currency {
                bail!(
                    "{BASE_CURRENCY_ENV}={base} disagrees with base_currency {} in {path}",
                    config.settings.base_currency
                );
            }
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading posting settings from {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let settings: PostingSettings =
            serde_json::from_str(raw).context("invalid posting settings document")?;
        Ok(Self { settings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_accounting::AccountRole;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_usd_without_any_variables() {
        let config = LedgerConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config.settings.base_currency.as_str(), "USD");
        assert!(config.settings.rule_table.is_empty());
    }

    #[test]
    fn base_currency_variable_is_honoured() {
        let config = LedgerConfig::from_lookup(vars(&[(BASE_CURRENCY_ENV, "KHR")])).unwrap();
        assert_eq!(config.settings.base_currency.as_str(), "KHR");
        assert!(LedgerConfig::from_lookup(vars(&[(BASE_CURRENCY_ENV, "dollars")])).is_err());
    }

    #[test]
    fn settings_document_parses_role_tables() {
        let account = ledgerflow_core::AccountId::new();
        let raw = format!(
            r#"{{
                "base_currency": "USD",
                "roles": {{ "generic": {{ "customer_wallet": "{account}" }} }},
                "commission_rules": [
                    {{ "zone_name": "north", "type": "PERCENTAGE", "value": "30", "is_default": true, "leg": "pickup" }}
                ]
            }}"#
        );
        let config = LedgerConfig::from_json_str(&raw).unwrap();
        assert_eq!(config.settings.roles.generic(AccountRole::CustomerWallet), Some(account));
        assert_eq!(config.settings.commission_rules.len(), 1);
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let err = LedgerConfig::from_lookup(vars(&[(SETTINGS_ENV, "/nonexistent/ledgerflow.json")])).unwrap_err();
        assert!(format!("{err:#}").contains("reading posting settings"));
    }
}
