//! Value Objects for the storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Rounds a monetary amount to cents, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Canonical product identifier.
///
/// Catalog rows carry either integer ids (legacy products) or UUIDs (bundles and newer
/// products). Both are folded into one string form on entry so the cart never branches on
/// the id's original type: `42`, `"42"` and `" 42 "` are the same product.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(value: impl Into<String>) -> Result<Self, ProductIdError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(ProductIdError::Empty); }
        if value.len() > 64 { return Err(ProductIdError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for ProductId {
    type Err = ProductIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

impl From<u64> for ProductId {
    fn from(value: u64) -> Self { Self(value.to_string()) }
}

impl From<i64> for ProductId {
    fn from(value: i64) -> Self { Self(value.to_string()) }
}

impl From<Uuid> for ProductId {
    fn from(value: Uuid) -> Self { Self(value.to_string()) }
}

impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw { Unsigned(u64), Signed(i64), Text(String) }

        match Raw::deserialize(deserializer)? {
            Raw::Unsigned(n) => Ok(n.into()),
            Raw::Signed(n) => Ok(n.into()),
            Raw::Text(s) => ProductId::new(s).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductIdError {
    #[error("product id is empty")]
    Empty,
    #[error("product id is too long")]
    TooLong,
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_lowercase() } }
    /// Builds an amount from integer minor units (cents), the form orders are stored in.
    pub fn from_minor(minor: i64, currency: &str) -> Self { Self::new(Decimal::new(minor, 2), currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    /// Minor units after rounding to cents.
    pub fn to_minor(&self) -> Result<i64, MoneyError> {
        let cents = round_money(self.amount).checked_mul(Decimal::ONE_HUNDRED).ok_or(MoneyError::OutOfRange)?;
        cents.trunc().to_i64().ok_or(MoneyError::OutOfRange)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let amount = round_money(self.amount);
        match self.currency.as_str() {
            "usd" => write!(f, "${:.2}", amount),
            other => write!(f, "{:.2} {}", amount, other.to_uppercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount out of range")]
    OutOfRange,
}
