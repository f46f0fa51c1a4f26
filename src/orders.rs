//! Order confirmation and tracking pages.
//!
//! Read-only. After the payment redirect the webhook may not have landed yet, so a
//! freshly placed order can legitimately still show an unpaid, pending state.

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::boundary::{BoundaryError, OrderDetails, OrderReader};
use crate::domain::aggregates::order::FULFILLMENT_SEQUENCE;
use crate::domain::aggregates::{OrderStatus, StatusDisplay, TrackingEvent};

#[derive(Clone, Debug, PartialEq)]
pub enum OrderLookup {
    Found(Box<OrderPage>),
    NotFound,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderPage {
    pub details: OrderDetails,
    pub events: Vec<TrackingEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TimelineStep {
    pub status: OrderStatus,
    pub display: StatusDisplay,
    pub reached: bool,
    pub current: bool,
}

impl OrderPage {
    pub fn status_display(&self) -> StatusDisplay { self.details.order.status.display() }

    /// Payment confirmation has not arrived yet.
    pub fn awaiting_payment(&self) -> bool { self.details.order.awaiting_payment() }

    /// The fixed fulfilment path with progress marked. A cancelled order shows the steps
    /// it never reached as unreached.
    pub fn timeline(&self) -> Vec<TimelineStep> {
        let status = self.details.order.status;
        let reached_upto = FULFILLMENT_SEQUENCE.iter().position(|s| *s == status);
        FULFILLMENT_SEQUENCE
            .iter()
            .enumerate()
            .map(|(i, step)| TimelineStep {
                status: *step,
                display: step.display(),
                reached: reached_upto.is_some_and(|r| i <= r),
                current: reached_upto == Some(i),
            })
            .collect()
    }

    /// Tracking events newest first.
    pub fn history(&self) -> Vec<&TrackingEvent> {
        let mut events: Vec<&TrackingEvent> = self.events.iter().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events
    }
}

async fn with_events(reader: &dyn OrderReader, details: Option<OrderDetails>) -> Result<OrderLookup, BoundaryError> {
    let Some(details) = details else { return Ok(OrderLookup::NotFound) };
    let events = match reader.tracking(details.order.id).await {
        Ok(events) => events,
        Err(e) => {
            warn!(order_id = %details.order.id, error = %e, "tracking events unavailable");
            Vec::new()
        }
    };
    Ok(OrderLookup::Found(Box::new(OrderPage { details, events })))
}

pub async fn load_order(reader: &dyn OrderReader, order_id: Uuid) -> Result<OrderLookup, BoundaryError> {
    let details = reader.order(order_id).await?;
    with_events(reader, details).await
}

/// Confirmation page lookup by the session id echoed back from the payment page.
pub async fn load_confirmation(reader: &dyn OrderReader, session_id: &str) -> Result<OrderLookup, BoundaryError> {
    let details = reader.order_by_session(session_id).await?;
    with_events(reader, details).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::sample_order;
    use crate::test_support::FakeOrders;
    use chrono::Duration;

    fn seeded() -> (FakeOrders, Uuid) {
        let orders = FakeOrders::default();
        let order = sample_order();
        let id = order.id;
        orders.insert(OrderDetails { order, items: vec![] });
        (orders, id)
    }

    #[tokio::test]
    async fn missing_order_is_not_found_state() {
        let (orders, _) = seeded();
        assert_eq!(load_order(&orders, Uuid::now_v7()).await, Ok(OrderLookup::NotFound));
        assert_eq!(load_confirmation(&orders, "cs_unknown").await, Ok(OrderLookup::NotFound));
    }

    #[tokio::test]
    async fn fresh_order_awaits_payment() {
        let (orders, _) = seeded();
        let OrderLookup::Found(page) = load_confirmation(&orders, "cs_test_1").await.unwrap() else { panic!("expected order") };
        assert!(page.awaiting_payment());
        let timeline = page.timeline();
        assert!(timeline[0].current);
        assert!(!timeline[1].reached);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let (orders, id) = seeded();
        let mut older = TrackingEvent::new(id, OrderStatus::Processing, None, Some("Payment received".into()));
        older.created_at -= Duration::hours(2);
        orders.push_event(older);
        orders.push_event(TrackingEvent::new(id, OrderStatus::Shipped, Some("Portland, OR".into()), None));

        let OrderLookup::Found(page) = load_order(&orders, id).await.unwrap() else { panic!("expected order") };
        let history = page.history();
        assert_eq!(history[0].status, "shipped");
        assert_eq!(history[1].display().icon, "package");
    }

    #[tokio::test]
    async fn cancelled_order_timeline_has_no_current_step() {
        let orders = FakeOrders::default();
        let mut order = sample_order();
        order.transition(OrderStatus::Cancelled).unwrap();
        let id = order.id;
        orders.insert(OrderDetails { order, items: vec![] });
        let OrderLookup::Found(page) = load_order(&orders, id).await.unwrap() else { panic!("expected order") };
        assert!(page.timeline().iter().all(|s| !s.reached && !s.current));
        assert_eq!(page.status_display().color, "red");
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_error() {
        let (orders, id) = seeded();
        orders.go_down();
        assert!(matches!(load_order(&orders, id).await, Err(BoundaryError::Transport(_))));
    }
}
