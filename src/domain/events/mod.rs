//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::OrderStatus;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: String, total: Decimal },
    Paid { order_id: Uuid, order_number: String, total: Decimal },
    PaymentFailed { order_id: Uuid },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
}

impl OrderEvent {
    /// Messaging subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "storefront.orders.created",
            Self::Paid { .. } => "storefront.orders.paid",
            Self::PaymentFailed { .. } => "storefront.orders.payment_failed",
            Self::StatusChanged { .. } => "storefront.orders.status_changed",
        }
    }
}
