//! Authoritative order totals, in minor units.
//!
//! Works from the raw line items and a freshly re-validated discount decision. The figure
//! the client submitted is never an input here.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::boundary::CheckoutLineItem;
use crate::domain::aggregates::MAX_LINE_QUANTITY;
use crate::domain::pricing::{DiscountDecision, DiscountType, TAX_RATE};
use crate::domain::value_objects::ProductId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Invalid item {0}")]
    InvalidItem(ProductId),
    #[error("Order total is out of range")]
    Overflow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeLine {
    pub product_id: ProductId,
    pub name: String,
    pub image: String,
    pub unit_amount: i64,
    pub quantity: u32,
    pub line_total: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthoritativeTotals {
    pub lines: Vec<ChargeLine>,
    pub subtotal: i64,
    pub discount: i64,
    pub tax: i64,
    pub total: i64,
}

/// Whole minor units, halves away from zero.
pub fn to_cents(amount: Decimal) -> Option<i64> {
    amount.checked_mul(Decimal::ONE_HUNDRED)?.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64()
}

fn round_cents(amount: Decimal) -> Option<i64> {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64()
}

pub fn recompute(items: &[CheckoutLineItem], decision: Option<&DiscountDecision>) -> Result<AuthoritativeTotals, PricingError> {
    if items.is_empty() { return Err(PricingError::EmptyCart); }

    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal: i64 = 0;
    for item in items {
        let unit_amount = to_cents(item.price).filter(|c| *c > 0).ok_or_else(|| PricingError::InvalidItem(item.id.clone()))?;
        if item.quantity == 0 || item.quantity > MAX_LINE_QUANTITY { return Err(PricingError::InvalidItem(item.id.clone())); }
        let line_total = unit_amount.checked_mul(i64::from(item.quantity)).ok_or(PricingError::Overflow)?;
        subtotal = subtotal.checked_add(line_total).ok_or(PricingError::Overflow)?;
        lines.push(ChargeLine {
            product_id: item.id.clone(),
            name: item.name.clone(),
            image: item.image.clone(),
            unit_amount,
            quantity: item.quantity,
            line_total,
        });
    }

    let discount = match decision.filter(|d| d.valid && d.discount_value > Decimal::ZERO) {
        None => 0,
        Some(d) => {
            // Anything too large to represent is past the subtotal anyway.
            let raw = match d.discount_type {
                DiscountType::Percentage => {
                    Decimal::from(subtotal).checked_mul(d.discount_value).and_then(|v| round_cents(v / Decimal::ONE_HUNDRED))
                }
                DiscountType::Fixed => to_cents(d.discount_value),
            };
            raw.unwrap_or(subtotal).clamp(0, subtotal)
        }
    };

    let after_discount = subtotal - discount;
    let tax = round_cents(Decimal::from(after_discount) * TAX_RATE).ok_or(PricingError::Overflow)?;
    let total = after_discount.checked_add(tax).ok_or(PricingError::Overflow)?;
    Ok(AuthoritativeTotals { lines, subtotal, discount, tax, total })
}
