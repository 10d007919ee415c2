//! Currency conversion between a transaction's native currency and the base
//! currency.
//!
//! Rates are always quoted as native units per one base unit: with a USD base
//! and a KHR transaction the rate is roughly 4000.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use ledgerflow_core::ValueObject;

use crate::error::{PostingError, PostingResult};

/// ISO-4217 style currency code ("USD", "KHR").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a three-letter code; lowercase input is normalized.
    pub fn new(code: impl AsRef<str>) -> PostingResult<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(PostingError::InvalidCurrency(format!(
                "expected three letters, got {code:?}"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Currency {}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = PostingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Native units per one base unit. Always strictly positive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct ExchangeRate(Decimal);

impl ExchangeRate {
    /// The identity rate used for the base currency itself.
    pub const ONE: ExchangeRate = ExchangeRate(Decimal::ONE);

    pub fn new(value: Decimal) -> Result<Self, String> {
        if value <= Decimal::ZERO {
            return Err(format!("rate must be positive, got {value}"));
        }
        Ok(Self(value))
    }

    /// Accept a floating point quote (e.g. from a rate feed), rejecting NaN and
    /// infinities.
    pub fn from_f64(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err(format!("rate must be finite, got {value}"));
        }
        let dec = Decimal::from_f64(value)
            .ok_or_else(|| format!("rate {value} is not representable"))?;
        Self::new(dec)
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl ValueObject for ExchangeRate {}

impl TryFrom<Decimal> for ExchangeRate {
    type Error = String;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExchangeRate> for Decimal {
    fn from(value: ExchangeRate) -> Self {
        value.0
    }
}

impl core::fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Round to the ledger's fixed precision (2 decimals, half away from zero).
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `round2(native / rate)`.
pub fn to_base(native: Decimal, rate: ExchangeRate) -> PostingResult<Decimal> {
    native
        .checked_div(rate.value())
        .map(round2)
        .ok_or_else(|| PostingError::invalid_amount(format!("{native} / {rate} overflows")))
}

/// `round2(base * rate)`.
pub fn to_native(base: Decimal, rate: ExchangeRate) -> PostingResult<Decimal> {
    base.checked_mul(rate.value())
        .map(round2)
        .ok_or_else(|| PostingError::invalid_amount(format!("{base} * {rate} overflows")))
}

/// Point-in-time set of exchange rates against one base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base: Currency,
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub rates: BTreeMap<Currency, ExchangeRate>,
}

impl RateSnapshot {
    pub fn new(base: Currency, as_of: DateTime<Utc>) -> Self {
        Self {
            base,
            as_of,
            rates: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: Currency, rate: ExchangeRate) -> Self {
        self.rates.insert(currency, rate);
        self
    }

    pub fn is_base(&self, currency: &Currency) -> bool {
        currency == &self.base
    }

    /// Rate for `currency`; the base currency is always 1.
    pub fn rate_for(&self, currency: &Currency) -> PostingResult<ExchangeRate> {
        if self.is_base(currency) {
            return Ok(ExchangeRate::ONE);
        }
        self.rates
            .get(currency)
            .copied()
            .ok_or_else(|| PostingError::InvalidExchangeRate {
                currency: currency.clone(),
                reason: format!("no rate against {} in snapshot as of {}", self.base, self.as_of),
            })
    }

    /// Convert an amount between two non-base currencies through the base.
    pub fn convert(&self, amount: Decimal, from: &Currency, to: &Currency) -> PostingResult<Decimal> {
        if from == to {
            return Ok(amount);
        }
        let base = to_base(amount, self.rate_for(from)?)?;
        to_native(base, self.rate_for(to)?)
    }
}
