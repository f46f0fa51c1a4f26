//! Order Aggregate
//!
//! Orders are created and advanced by the payment boundary and by store staff. The
//! storefront only reads them, so the lenient parsing below lets an unexpected status
//! string render as "pending" instead of failing the page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{Money, ProductId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

/// Forward path every order follows; `Cancelled` branches off any non-terminal step.
pub const FULFILLMENT_SEQUENCE: [OrderStatus; 4] =
    [OrderStatus::Pending, OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered];

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a stored status, falling back to `Pending` for anything unrecognised.
    pub fn parse_lenient(raw: &str) -> Self { raw.parse().unwrap_or_default() }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    pub fn next(&self) -> Option<Self> {
        let pos = FULFILLMENT_SEQUENCE.iter().position(|s| s == self)?;
        FULFILLMENT_SEQUENCE.get(pos + 1).copied()
    }

    pub fn can_transition_to(&self, target: Self) -> bool {
        if self.is_terminal() { return false; }
        target == Self::Cancelled || self.next() == Some(target)
    }

    pub fn display(&self) -> StatusDisplay {
        match self {
            Self::Pending => StatusDisplay { icon: "clock", color: "amber", label: "Order placed" },
            Self::Processing => StatusDisplay { icon: "package", color: "blue", label: "Processing" },
            Self::Shipped => StatusDisplay { icon: "truck", color: "purple", label: "Shipped" },
            Self::Delivered => StatusDisplay { icon: "check-circle", color: "green", label: "Delivered" },
            Self::Cancelled => StatusDisplay { icon: "x-circle", color: "red", label: "Cancelled" },
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(OrderError::UnknownStatus(s.to_string())),
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Failed => "failed", Self::Refunded => "refunded" }
    }
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" => Self::Paid,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            _ => Self::Pending,
        }
    }
}

/// Static icon/colour lookup used by order pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusDisplay { pub icon: &'static str, pub color: &'static str, pub label: &'static str }

/// Display lookup for a raw status string; unknown values render as pending.
pub fn status_display(raw: &str) -> StatusDisplay { OrderStatus::parse_lenient(raw).display() }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub customer_email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
    pub shipping_address: serde_json::Value,
    pub discount_code_id: Option<String>,
    pub payment_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

/// Server-appended status or location update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn new(order_id: Uuid, status: OrderStatus, location: Option<String>, description: Option<String>) -> Self {
        Self { id: Uuid::now_v7(), order_id, status: status.as_str().to_string(), location, description, created_at: Utc::now() }
    }
    pub fn display(&self) -> StatusDisplay { status_display(&self.status) }
}

impl Order {
    /// Moves the order one legal step. Returns the event to publish.
    pub fn transition(&mut self, target: OrderStatus) -> Result<OrderEvent, OrderError> {
        if !self.status.can_transition_to(target) {
            return Err(OrderError::IllegalTransition { from: self.status, to: target });
        }
        let from = self.status;
        self.status = target;
        self.touch();
        Ok(OrderEvent::StatusChanged { order_id: self.id, from, to: target })
    }

    /// Records a successful payment. Replays are no-ops and return `None`.
    pub fn mark_paid(&mut self) -> Option<OrderEvent> {
        if self.payment_status == PaymentStatus::Paid { return None; }
        self.payment_status = PaymentStatus::Paid;
        if self.status == OrderStatus::Pending { self.status = OrderStatus::Processing; }
        self.touch();
        Some(OrderEvent::Paid { order_id: self.id, order_number: self.order_number.clone(), total: self.total.amount() })
    }

    /// A paid order is never downgraded by a late failure notification.
    pub fn mark_payment_failed(&mut self) -> Option<OrderEvent> {
        if matches!(self.payment_status, PaymentStatus::Paid | PaymentStatus::Failed) { return None; }
        self.payment_status = PaymentStatus::Failed;
        self.touch();
        Some(OrderEvent::PaymentFailed { order_id: self.id })
    }

    /// True until the payment webhook has been processed.
    pub fn awaiting_payment(&self) -> bool { self.payment_status == PaymentStatus::Pending }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("unknown order status `{0}`")]
    UnknownStatus(String),
    #[error("cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
}

#[cfg(test)]
pub(crate) fn sample_order() -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::now_v7(),
        order_number: "ORD-TEST1".into(),
        user_id: None,
        customer_email: "ada@example.com".into(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        subtotal: Money::from_minor(10000, "usd"),
        discount: Money::from_minor(1000, "usd"),
        tax: Money::from_minor(720, "usd"),
        total: Money::from_minor(9720, "usd"),
        shipping_address: serde_json::json!({}),
        discount_code_id: None,
        payment_session_id: Some("cs_test_1".into()),
        created_at: now,
        updated_at: now,
    }
}
