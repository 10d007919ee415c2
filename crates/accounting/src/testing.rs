//! Shared fixtures for the crate's unit tests.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ledgerflow_core::{AccountId, BookingId, ItemId, UserId};

use crate::account::{Account, AccountType, ChartOfAccounts};
use crate::allocation::{Assignee, Booking, BookingItem, ServiceType};
use crate::context::PostingContext;
use crate::currency::{Currency, ExchangeRate, RateSnapshot};
use crate::resolver::AccountResolver;
use crate::settings::{AccountOverrides, AccountRole, PostingSettings};

fn account_type(role: AccountRole) -> AccountType {
    match role {
        AccountRole::SettlementBank => AccountType::Asset,
        AccountRole::CustomerWallet
        | AccountRole::DriverWallet
        | AccountRole::TaxPayable
        | AccountRole::CommissionPayable => AccountType::Liability,
        AccountRole::DeliveryRevenue | AccountRole::ExpressRevenue | AccountRole::SalesReturns => {
            AccountType::Revenue
        }
        AccountRole::CommissionExpense | AccountRole::PurchaseExpense => AccountType::Expense,
    }
}

/// USD-based books with every role on its reserved code, in USD and KHR, and a
/// KHR rate of 4000.
pub struct Books {
    pub settings: PostingSettings,
    pub chart: ChartOfAccounts,
    pub rates: RateSnapshot,
    pub resolver: AccountResolver,
    pub overrides: AccountOverrides,
}

impl Books {
    pub fn new() -> Self {
        let usd = Currency::new("USD").unwrap();
        let khr = Currency::new("KHR").unwrap();

        let mut accounts = vec![Account::new("1000", "Assets", AccountType::Asset).header()];
        for role in AccountRole::ALL {
            accounts.push(Account::new(role.reserved_code(), role.name(), account_type(role)));
            accounts.push(
                Account::new(role.reserved_code_for(&khr, &usd), role.name(), account_type(role))
                    .in_currency(khr.clone()),
            );
        }

        Self {
            settings: PostingSettings::new(usd.clone()),
            chart: ChartOfAccounts::new(accounts).unwrap(),
            rates: RateSnapshot::new(usd, Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap())
                .with_rate(khr, ExchangeRate::new(dec!(4000)).unwrap()),
            resolver: AccountResolver::standard(),
            overrides: AccountOverrides::none(),
        }
    }

    pub fn ctx(&self) -> PostingContext<'_> {
        PostingContext {
            settings: &self.settings,
            chart: &self.chart,
            rates: &self.rates,
            resolver: &self.resolver,
            overrides: &self.overrides,
        }
    }

    pub fn id(&self, role: AccountRole) -> AccountId {
        self.chart.by_code(role.reserved_code()).unwrap().id
    }

    pub fn id_in(&self, role: AccountRole, currency: &str) -> AccountId {
        let code = format!("{}-{}", role.reserved_code(), currency);
        self.chart.by_code(&code).unwrap().id
    }

    pub fn header_id(&self) -> AccountId {
        self.chart.by_code("1000").unwrap().id
    }
}

pub fn booking(service_type: ServiceType, currency: &str, fee: Decimal, tax: Decimal, item_count: u32) -> Booking {
    Booking {
        id: BookingId::new(),
        service_type,
        currency: Currency::new(currency).unwrap(),
        total_fee: fee,
        total_tax: tax,
        item_count,
        recognized_items: BTreeSet::new(),
    }
}

pub fn item(booking: &Booking, pickup_zone: Option<&str>, delivery_zone: Option<&str>) -> BookingItem {
    let assignee = |zone: &str| Assignee {
        driver_id: UserId::new(),
        zone: zone.to_string(),
    };
    BookingItem {
        id: ItemId::new(),
        booking_id: booking.id,
        pickup: pickup_zone.map(assignee),
        delivery: delivery_zone.map(assignee),
        cleared: false,
    }
}
