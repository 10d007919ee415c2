//! Commission & allocation: spreading a settlement's collected cash over the
//! items it clears.
//!
//! Booking fee and tax are split evenly by item count (not by item value).
//! Commission is charged on the full item fee, per pickup/delivery leg, using
//! the rule for the assignee's zone.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, BookingId, Entity, ItemId, UserId};

use crate::context::PostingContext;
use crate::currency::Currency;
use crate::error::{PostingError, PostingResult};
use crate::journal::Side;
use crate::settings::AccountRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Delivery,
    Express,
}

impl ServiceType {
    pub fn revenue_role(self) -> AccountRole {
        match self {
            ServiceType::Delivery => AccountRole::DeliveryRevenue,
            ServiceType::Express => AccountRole::ExpressRevenue,
        }
    }
}

/// Source business record whose fee and tax are shared by its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub service_type: ServiceType,
    pub currency: Currency,
    pub total_fee: Decimal,
    pub total_tax: Decimal,
    /// Items recorded on the booking; zero is treated as one.
    pub item_count: u32,
    /// Items whose fee has already been booked as revenue.
    #[serde(default)]
    pub recognized_items: BTreeSet<ItemId>,
}

impl Booking {
    fn divisor(&self) -> Decimal {
        Decimal::from(self.item_count.max(1))
    }

    pub fn is_recognized(&self, item: &ItemId) -> bool {
        self.recognized_items.contains(item)
    }
}

impl Entity for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub driver_id: UserId,
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingItem {
    pub id: ItemId,
    pub booking_id: BookingId,
    #[serde(default)]
    pub pickup: Option<Assignee>,
    #[serde(default)]
    pub delivery: Option<Assignee>,
    /// Set once a settlement covering the item has been approved.
    #[serde(default)]
    pub cleared: bool,
}

impl Entity for BookingItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionLeg {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionType {
    Percentage,
    FixedAmount,
}

fn default_leg() -> CommissionLeg {
    CommissionLeg::Delivery
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub zone_name: String,
    #[serde(rename = "type")]
    pub rule_type: CommissionType,
    pub value: Decimal,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_leg")]
    pub leg: CommissionLeg,
}

impl CommissionRule {
    /// Commission earned on one item with the given (full) fee.
    pub fn commission_for(&self, item_fee: Decimal) -> Decimal {
        match self.rule_type {
            CommissionType::Percentage => item_fee * self.value / Decimal::ONE_HUNDRED,
            CommissionType::FixedAmount => self.value,
        }
    }
}

/// Zone rule for `leg`, falling back to the leg's default rule.
pub fn rule_for<'a>(rules: &'a [CommissionRule], zone: &str, leg: CommissionLeg) -> Option<&'a CommissionRule> {
    rules
        .iter()
        .find(|r| r.leg == leg && r.zone_name.eq_ignore_ascii_case(zone))
        .or_else(|| rules.iter().find(|r| r.leg == leg && r.is_default))
}

/// Items cleared by one settlement, with the bookings they belong to.
#[derive(Debug, Clone, Copy)]
pub struct SettlementInput<'a> {
    pub cash_collected: Decimal,
    pub currency: &'a Currency,
    pub items: &'a [BookingItem],
    pub bookings: &'a BTreeMap<BookingId, Booking>,
}

/// What is owed back to the counterparty after fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetLiability {
    /// Absolute amount.
    pub amount: Decimal,
    /// `Credit` when cash exceeded fees, `Debit` when fees exceeded cash.
    pub polarity: Side,
}

impl NetLiability {
    pub fn from_signed(signed: Decimal) -> Self {
        let polarity = if signed.is_sign_negative() && !signed.is_zero() {
            Side::Debit
        } else {
            Side::Credit
        };
        Self {
            amount: signed.abs(),
            polarity,
        }
    }

    /// Positive when owed to the counterparty.
    pub fn signed(&self) -> Decimal {
        match self.polarity {
            Side::Credit => self.amount,
            Side::Debit => -self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Native amounts per revenue account (unrounded).
    pub revenue_by_account: BTreeMap<AccountId, Decimal>,
    pub tax_by_account: BTreeMap<AccountId, Decimal>,
    pub commission_total: Decimal,
    pub total_revenue: Decimal,
    pub total_tax: Decimal,
    pub net_liability: NetLiability,
    /// Items whose fee this allocation recognizes, per booking.
    pub recognized: BTreeMap<BookingId, BTreeSet<ItemId>>,
}

impl Allocation {
    pub fn recognizes_anything(&self) -> bool {
        !self.recognized.is_empty()
    }
}

/// Revenue and tax for an explicit list of items of one booking, skipping the
/// ones already recognized. Shared by settlements and fee recognition.
pub(crate) struct ItemShare {
    pub fee: Decimal,
    pub tax: Decimal,
}

pub(crate) fn item_share(
    booking: &Booking,
    currency: &Currency,
    ctx: &PostingContext<'_>,
) -> PostingResult<ItemShare> {
    let fee = ctx.rates.convert(booking.total_fee, &booking.currency, currency)?;
    let tax = ctx.rates.convert(booking.total_tax, &booking.currency, currency)?;
    Ok(ItemShare {
        fee: fee / booking.divisor(),
        tax: tax / booking.divisor(),
    })
}

pub fn allocate(input: &SettlementInput<'_>, ctx: &PostingContext<'_>) -> PostingResult<Allocation> {
    let mut revenue_by_account: BTreeMap<AccountId, Decimal> = BTreeMap::new();
    let mut tax_by_account: BTreeMap<AccountId, Decimal> = BTreeMap::new();
    let mut recognized: BTreeMap<BookingId, BTreeSet<ItemId>> = BTreeMap::new();
    let mut commission_total = Decimal::ZERO;
    let mut seen: BTreeSet<ItemId> = BTreeSet::new();

    for item in input.items {
        if !seen.insert(item.id) {
            continue;
        }
        let booking = input
            .bookings
            .get(&item.booking_id)
            .ok_or(PostingError::UnknownBooking(item.booking_id))?;
        if booking.is_recognized(&item.id) {
            tracing::debug!(item = %item.id, booking = %booking.id, "item fee already recognized; skipping");
            continue;
        }

        let share = item_share(booking, input.currency, ctx)?;
        let item_revenue = share.fee - share.tax;

        if !item_revenue.is_zero() {
            let account = ctx.resolve(booking.service_type.revenue_role(), input.currency)?;
            *revenue_by_account.entry(account).or_default() += item_revenue;
        }
        if !share.tax.is_zero() {
            let account = ctx.resolve(AccountRole::TaxPayable, input.currency)?;
            *tax_by_account.entry(account).or_default() += share.tax;
        }

        let legs = [
            (CommissionLeg::Pickup, item.pickup.as_ref()),
            (CommissionLeg::Delivery, item.delivery.as_ref()),
        ];
        for (leg, assignee) in legs {
            let Some(assignee) = assignee else { continue };
            if let Some(rule) = rule_for(&ctx.settings.commission_rules, &assignee.zone, leg) {
                commission_total += rule.commission_for(share.fee);
            }
        }

        recognized.entry(booking.id).or_default().insert(item.id);
    }

    let total_revenue: Decimal = revenue_by_account.values().copied().sum();
    let total_tax: Decimal = tax_by_account.values().copied().sum();

    Ok(Allocation {
        net_liability: NetLiability::from_signed(input.cash_collected - total_revenue - total_tax),
        revenue_by_account,
        tax_by_account,
        commission_total,
        total_revenue,
        total_tax,
        recognized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Books, booking, item};
    use rust_decimal_macros::dec;

    fn rule(zone: &str, leg: CommissionLeg, rule_type: CommissionType, value: Decimal, is_default: bool) -> CommissionRule {
        CommissionRule {
            zone_name: zone.to_string(),
            rule_type,
            value,
            is_default,
            leg,
        }
    }

    #[test]
    fn fee_and_tax_are_split_by_item_count() {
        let books = Books::new();
        let b = booking(ServiceType::Delivery, "USD", dec!(9), dec!(3), 3);
        let items = vec![item(&b, None, None), item(&b, None, None)];
        let bookings = BTreeMap::from([(b.id, b)]);
        let usd = Currency::new("USD").unwrap();

        let alloc = allocate(
            &SettlementInput { cash_collected: dec!(20), currency: &usd, items: &items, bookings: &bookings },
            &books.ctx(),
        )
        .unwrap();

        // 2 of 3 items: fee 6, tax 2, revenue 4.
        assert_eq!(alloc.total_revenue, dec!(4));
        assert_eq!(alloc.total_tax, dec!(2));
        assert_eq!(alloc.revenue_by_account[&books.id(AccountRole::DeliveryRevenue)], dec!(4));
        assert_eq!(alloc.tax_by_account[&books.id(AccountRole::TaxPayable)], dec!(2));
        assert_eq!(alloc.net_liability, NetLiability { amount: dec!(14), polarity: Side::Credit });
    }

    #[test]
    fn zero_item_count_is_treated_as_one() {
        let books = Books::new();
        let b = booking(ServiceType::Express, "USD", dec!(5), dec!(0), 0);
        let items = vec![item(&b, None, None)];
        let bookings = BTreeMap::from([(b.id, b)]);
        let usd = Currency::new("USD").unwrap();

        let alloc = allocate(
            &SettlementInput { cash_collected: dec!(5), currency: &usd, items: &items, bookings: &bookings },
            &books.ctx(),
        )
        .unwrap();
        assert_eq!(alloc.revenue_by_account[&books.id(AccountRole::ExpressRevenue)], dec!(5));
        assert!(alloc.net_liability.amount.is_zero());
    }

    #[test]
    fn commission_uses_full_fee_per_leg_with_default_fallback() {
        let mut books = Books::new();
        books.settings.commission_rules = vec![
            rule("north", CommissionLeg::Pickup, CommissionType::Percentage, dec!(30), false),
            rule("anywhere", CommissionLeg::Delivery, CommissionType::FixedAmount, dec!(0.75), true),
            rule("north", CommissionLeg::Delivery, CommissionType::Percentage, dec!(70), false),
        ];
        let b = booking(ServiceType::Delivery, "USD", dec!(10), dec!(1), 1);
        let items = vec![item(&b, Some("North"), Some("south"))];
        let bookings = BTreeMap::from([(b.id, b)]);
        let usd = Currency::new("USD").unwrap();

        let alloc = allocate(
            &SettlementInput { cash_collected: dec!(10), currency: &usd, items: &items, bookings: &bookings },
            &books.ctx(),
        )
        .unwrap();

        // pickup: 30% of the full 10 (not 9 net of tax); delivery: south → default fixed 0.75.
        assert_eq!(alloc.commission_total, dec!(3.75));
    }

    #[test]
    fn negative_net_liability_has_debit_polarity() {
        let books = Books::new();
        let b = booking(ServiceType::Delivery, "USD", dec!(8), dec!(0), 1);
        let items = vec![item(&b, None, None)];
        let bookings = BTreeMap::from([(b.id, b)]);
        let usd = Currency::new("USD").unwrap();

        let alloc = allocate(
            &SettlementInput { cash_collected: dec!(3), currency: &usd, items: &items, bookings: &bookings },
            &books.ctx(),
        )
        .unwrap();
        assert_eq!(alloc.net_liability, NetLiability { amount: dec!(5), polarity: Side::Debit });
        assert_eq!(alloc.net_liability.signed(), dec!(-5));
    }

    #[test]
    fn recognized_and_duplicate_items_are_skipped() {
        let mut books = Books::new();
        books.settings.commission_rules =
            vec![rule("x", CommissionLeg::Delivery, CommissionType::FixedAmount, dec!(1), true)];
        let mut b = booking(ServiceType::Delivery, "USD", dec!(4), dec!(0), 2);
        let done = item(&b, None, Some("x"));
        let fresh = item(&b, None, Some("x"));
        b.recognized_items.insert(done.id);
        let items = vec![done, fresh.clone(), fresh.clone()];
        let bookings = BTreeMap::from([(b.id, b.clone())]);
        let usd = Currency::new("USD").unwrap();

        let alloc = allocate(
            &SettlementInput { cash_collected: dec!(10), currency: &usd, items: &items, bookings: &bookings },
            &books.ctx(),
        )
        .unwrap();
        assert_eq!(alloc.total_revenue, dec!(2));
        assert_eq!(alloc.commission_total, dec!(1));
        assert_eq!(alloc.recognized[&b.id], BTreeSet::from([fresh.id]));
    }

    #[test]
    fn booking_in_other_currency_is_converted() {
        let books = Books::new();
        let b = booking(ServiceType::Delivery, "KHR", dec!(20000), dec!(0), 1);
        let items = vec![item(&b, None, None)];
        let bookings = BTreeMap::from([(b.id, b)]);
        let usd = Currency::new("USD").unwrap();

        let alloc = allocate(
            &SettlementInput { cash_collected: dec!(10), currency: &usd, items: &items, bookings: &bookings },
            &books.ctx(),
        )
        .unwrap();
        assert_eq!(alloc.total_revenue, dec!(5));
    }

    #[test]
    fn missing_booking_aborts() {
        let books = Books::new();
        let b = booking(ServiceType::Delivery, "USD", dec!(1), dec!(0), 1);
        let items = vec![item(&b, None, None)];
        let usd = Currency::new("USD").unwrap();

        let err = allocate(
            &SettlementInput { cash_collected: dec!(1), currency: &usd, items: &items, bookings: &BTreeMap::new() },
            &books.ctx(),
        )
        .unwrap_err();
        assert_eq!(err, PostingError::UnknownBooking(b.id));
    }
}
