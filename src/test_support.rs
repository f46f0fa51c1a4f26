//! In-memory stand-ins for the backend, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::boundary::{
    BoundaryError, CheckoutSessionRequest, CheckoutSessionResponse, CheckoutSessions, DiscountAuthority,
    DiscountRequest, IdentityProvider, OrderDetails, OrderReader, User,
};
use crate::checkout::ShippingDetails;
use crate::domain::aggregates::{ProductSnapshot, TrackingEvent};
use crate::domain::pricing::{DiscountDecision, DiscountType};
use crate::domain::value_objects::ProductId;

pub(crate) fn product(id: &str, cents: i64) -> ProductSnapshot {
    ProductSnapshot::new(ProductId::new(id).unwrap(), format!("Product {id}"), Decimal::new(cents, 2)).unwrap()
}

pub(crate) fn percent_off(code: &str, percent: i64) -> DiscountDecision {
    DiscountDecision {
        valid: true,
        code: code.to_string(),
        discount_type: DiscountType::Percentage,
        discount_value: Decimal::new(percent, 0),
        discount_code_id: Some(format!("dc_{code}")),
        error: None,
    }
}

pub(crate) fn fixed_off(code: &str, amount: Decimal) -> DiscountDecision {
    DiscountDecision { discount_type: DiscountType::Fixed, discount_value: amount, ..percent_off(code, 0) }
}

pub(crate) fn shipping() -> ShippingDetails {
    ShippingDetails {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: "ada@example.com".into(),
        phone: "555-010-2030".into(),
        address: "12 Analytical Way".into(),
        city: "Portland".into(),
        state: "OR".into(),
        postal_code: "97201".into(),
        country: "United States".into(),
    }
}

/// Suspends calls until released, to observe behaviour while a request is outstanding.
#[derive(Default)]
struct Gate {
    closed: AtomicBool,
    notify: Notify,
}

impl Gate {
    fn close(&self) { self.closed.store(true, Ordering::Release); }
    fn release(&self) {
        self.closed.store(false, Ordering::Release);
        self.notify.notify_one();
    }
    async fn pass(&self) {
        if self.closed.load(Ordering::Acquire) { self.notify.notified().await; }
    }
}

pub(crate) struct FakeIdentity {
    user: Option<User>,
    unreachable: bool,
    gate: Gate,
    tx: watch::Sender<Option<User>>,
}

impl FakeIdentity {
    fn with(user: Option<User>, unreachable: bool) -> Self {
        let (tx, _) = watch::channel(user.clone());
        Self { user, unreachable, gate: Gate::default(), tx }
    }

    pub(crate) fn signed_in() -> Self {
        Self::with(
            Some(User {
                id: Uuid::from_u128(7),
                email: Some("ada@example.com".into()),
                first_name: Some("Ada".into()),
                last_name: Some("Lovelace".into()),
            }),
            false,
        )
    }

    pub(crate) fn signed_out() -> Self { Self::with(None, false) }
    pub(crate) fn unreachable() -> Self { Self::with(None, true) }

    pub(crate) fn gated(self) -> Self {
        self.gate.close();
        self
    }

    pub(crate) fn release(&self) { self.gate.release(); }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_user(&self) -> Result<Option<User>, BoundaryError> {
        self.gate.pass().await;
        if self.unreachable { return Err(BoundaryError::Transport("auth down".into())); }
        Ok(self.user.clone())
    }

    async fn sign_out(&self) -> Result<(), BoundaryError> {
        self.tx.send_replace(None);
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<Option<User>> { self.tx.subscribe() }
}

pub(crate) struct FakeDiscounts {
    answer: Mutex<Result<DiscountDecision, BoundaryError>>,
    requests: Mutex<Vec<DiscountRequest>>,
    gate: Gate,
}

impl FakeDiscounts {
    pub(crate) fn answering(decision: DiscountDecision) -> Self {
        Self { answer: Mutex::new(Ok(decision)), requests: Mutex::default(), gate: Gate::default() }
    }

    pub(crate) fn gated(self) -> Self {
        self.gate.close();
        self
    }

    pub(crate) fn gate(&self) { self.gate.close(); }
    pub(crate) fn release(&self) { self.gate.release(); }
    pub(crate) fn answer(&self, answer: Result<DiscountDecision, BoundaryError>) { *self.answer.lock().unwrap() = answer; }
    pub(crate) fn calls(&self) -> usize { self.requests.lock().unwrap().len() }
    pub(crate) fn last_request(&self) -> Option<DiscountRequest> { self.requests.lock().unwrap().last().cloned() }
}

#[async_trait]
impl DiscountAuthority for FakeDiscounts {
    async fn validate(&self, request: &DiscountRequest) -> Result<DiscountDecision, BoundaryError> {
        self.requests.lock().unwrap().push(request.clone());
        self.gate.pass().await;
        self.answer.lock().unwrap().clone()
    }
}

pub(crate) struct FakeSessions {
    response: CheckoutSessionResponse,
    failure: Mutex<Option<BoundaryError>>,
    requests: Mutex<Vec<CheckoutSessionRequest>>,
    calls: AtomicUsize,
    gate: Gate,
}

impl FakeSessions {
    pub(crate) fn succeeding() -> Self {
        Self {
            response: CheckoutSessionResponse {
                url: "https://pay.test/cs_test_1".into(),
                session_id: "cs_test_1".into(),
                order_id: Uuid::from_u128(1),
                order_number: "ORD-TEST1".into(),
            },
            failure: Mutex::new(None),
            requests: Mutex::default(),
            calls: AtomicUsize::new(0),
            gate: Gate::default(),
        }
    }

    pub(crate) fn fail_with(&self, err: BoundaryError) { *self.failure.lock().unwrap() = Some(err); }
    pub(crate) fn succeed(&self) { *self.failure.lock().unwrap() = None; }
    pub(crate) fn gate(&self) { self.gate.close(); }
    pub(crate) fn release(&self) { self.gate.release(); }
    pub(crate) fn calls(&self) -> usize { self.calls.load(Ordering::Acquire) }
    pub(crate) fn response(&self) -> CheckoutSessionResponse { self.response.clone() }
    pub(crate) fn last_request(&self) -> Option<CheckoutSessionRequest> { self.requests.lock().unwrap().last().cloned() }
}

#[async_trait]
impl CheckoutSessions for FakeSessions {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<CheckoutSessionResponse, BoundaryError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.requests.lock().unwrap().push(request.clone());
        self.gate.pass().await;
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(self.response.clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeOrders {
    orders: Mutex<HashMap<Uuid, OrderDetails>>,
    events: Mutex<HashMap<Uuid, Vec<TrackingEvent>>>,
    down: AtomicBool,
}

impl FakeOrders {
    pub(crate) fn insert(&self, details: OrderDetails) { self.orders.lock().unwrap().insert(details.order.id, details); }
    pub(crate) fn push_event(&self, event: TrackingEvent) {
        self.events.lock().unwrap().entry(event.order_id).or_default().push(event);
    }
    pub(crate) fn go_down(&self) { self.down.store(true, Ordering::Release); }

    fn check(&self) -> Result<(), BoundaryError> {
        if self.down.load(Ordering::Acquire) { Err(BoundaryError::Transport("orders down".into())) } else { Ok(()) }
    }
}

#[async_trait]
impl OrderReader for FakeOrders {
    async fn order(&self, id: Uuid) -> Result<Option<OrderDetails>, BoundaryError> {
        self.check()?;
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn order_by_session(&self, session_id: &str) -> Result<Option<OrderDetails>, BoundaryError> {
        self.check()?;
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|d| d.order.payment_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn tracking(&self, order_id: Uuid) -> Result<Vec<TrackingEvent>, BoundaryError> {
        self.check()?;
        Ok(self.events.lock().unwrap().get(&order_id).cloned().unwrap_or_default())
    }
}
