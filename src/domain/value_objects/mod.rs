//! Value Objects for the commerce core

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// Money is always held at 2 decimal places, rounded half-up.
const MONEY_DP: u32 = 2;

/// Money value object (single settlement currency)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const ONE: Money = Money(Decimal::ONE);

    pub fn new(amount: Decimal) -> Self { Self(round_half_up(amount)) }
    pub fn from_major(units: i64) -> Self { Self(Decimal::from(units)) }
    /// `Money::from_minor(45050)` is `450.50`.
    pub fn from_minor(minor: i64) -> Self { Self(Decimal::new(minor, MONEY_DP)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }
    pub fn is_negative(&self) -> bool { self.0 < Decimal::ZERO }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.0 * Decimal::from(qty)) }

    /// Share of this amount for a percentage, e.g. 10% of 500.00 is 50.00.
    pub fn percent(&self, pct: Percentage) -> Money {
        Money::new(self.0 * Decimal::from(pct.value()) / Decimal::ONE_HUNDRED)
    }

    /// Amount after taking a percentage off.
    pub fn discounted_by(&self, pct: Percentage) -> Money {
        let factor = Decimal::ONE - Decimal::from(pct.value()) / Decimal::ONE_HUNDRED;
        Money::new(self.0 * factor)
    }

    /// Smallest unit of the currency (paise/cents) for gateway payloads.
    pub fn to_minor_units(&self) -> i64 {
        (self.0 * Decimal::ONE_HUNDRED).trunc().to_i64().unwrap_or_default()
    }

    pub fn max(self, other: Money) -> Money { if self >= other { self } else { other } }
    pub fn min(self, other: Money) -> Money { if self <= other { self } else { other } }
}

fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money::new(self.0 + rhs.0) }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money { Money::new(self.0 - rhs.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, |acc, m| acc + m) }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self { Money::new(value) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Discount percentage, 1 to 90 inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Percentage(u8);

impl Percentage {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 90;

    pub fn new(value: u8) -> Result<Self, PercentageError> {
        if !(Self::MIN..=Self::MAX).contains(&value) { return Err(PercentageError::OutOfRange(value)); }
        Ok(Self(value))
    }
    pub fn value(&self) -> u8 { self.0 }
}

impl TryFrom<u8> for Percentage {
    type Error = PercentageError;
    fn try_from(value: u8) -> Result<Self, Self::Error> { Percentage::new(value) }
}

impl From<Percentage> for u8 {
    fn from(p: Percentage) -> u8 { p.0 }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}%", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PercentageError { OutOfRange(u8) }
impl std::error::Error for PercentageError {}
impl fmt::Display for PercentageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::OutOfRange(v) => write!(f, "percentage {} outside {}..={}", v, Percentage::MIN, Percentage::MAX) }
    }
}

const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ORDER_SUFFIX_LEN: usize = 6;

/// Human readable order identifier: `ORD<YYYYMMDD>-<6 base36 chars>`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ORDER_SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(format!("ORD{}-{}", now.format("%Y%m%d"), suffix))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, OrderNumberError> {
        let value = value.into().trim().to_uppercase();
        let rest = value.strip_prefix("ORD").ok_or(OrderNumberError::Malformed)?;
        let (date, suffix) = rest.split_once('-').ok_or(OrderNumberError::Malformed)?;
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) { return Err(OrderNumberError::Malformed); }
        if suffix.len() != ORDER_SUFFIX_LEN || !suffix.bytes().all(|b| BASE36.contains(&b)) { return Err(OrderNumberError::Malformed); }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderNumberError { Malformed }
impl std::error::Error for OrderNumberError {}
impl fmt::Display for OrderNumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Malformed order number") }
}
