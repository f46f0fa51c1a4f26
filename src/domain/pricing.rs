//! Discount and tax arithmetic for an order.
//!
//! Eligibility of a discount code is decided remotely; this module only applies a decision
//! that has already been issued. Every displayed amount is rounded to cents as it is derived,
//! so the totals shown to the shopper match the minor-unit charge the payment boundary computes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::round_money;

/// Flat sales tax applied to the post-discount total.
pub const TAX_RATE: Decimal = Decimal::from_parts(8, 0, 0, false, 2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// Verdict issued by the discount validation procedure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscountDecision {
    pub valid: bool,
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_discount_type")]
    pub discount_type: DiscountType,
    #[serde(default)]
    pub discount_value: Decimal,
    #[serde(default)]
    pub discount_code_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_discount_type() -> DiscountType { DiscountType::Percentage }

impl DiscountDecision {
    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            code: code.into(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::ZERO,
            discount_code_id: None,
            error: Some(reason.into()),
        }
    }

    /// Discount this decision grants on `subtotal`, clamped to `[0, subtotal]`.
    pub fn amount_off(&self, subtotal: Decimal) -> Decimal {
        if !self.valid || subtotal <= Decimal::ZERO || self.discount_value <= Decimal::ZERO { return Decimal::ZERO; }
        let raw = match self.discount_type {
            // An overflowing product is far past 100%.
            DiscountType::Percentage => subtotal.checked_mul(self.discount_value).map_or(subtotal, |v| v / Decimal::ONE_HUNDRED),
            DiscountType::Fixed => self.discount_value,
        };
        round_money(raw.min(subtotal))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscountedTotal {
    pub discount_amount: Decimal,
    pub final_total: Decimal,
}

/// Applies an optional decision to a subtotal. Pure; the final total is never negative.
pub fn calculate_discounted_total(subtotal: Decimal, decision: Option<&DiscountDecision>) -> DiscountedTotal {
    let subtotal = round_money(subtotal);
    let discount_amount = decision.map_or(Decimal::ZERO, |d| d.amount_off(subtotal));
    DiscountedTotal { discount_amount, final_total: subtotal - discount_amount }
}

/// Derived totals for the payment step. Never persisted on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub final_total: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
}

impl OrderTotals {
    pub fn compute(subtotal: Decimal, decision: Option<&DiscountDecision>) -> Self {
        let DiscountedTotal { discount_amount, final_total } = calculate_discounted_total(subtotal, decision);
        let tax = round_money(final_total.checked_mul(TAX_RATE).unwrap_or(Decimal::MAX));
        Self {
            subtotal: round_money(subtotal),
            discount_amount,
            final_total,
            tax,
            grand_total: final_total.checked_add(tax).unwrap_or(Decimal::MAX),
        }
    }
}
