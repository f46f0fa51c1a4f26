//! Checkout flow: shipping details, payment handoff and the return from the hosted
//! payment page.
//!
//! ```text
//! Shipping -> Payment -> (hosted payment page) -> Confirmed
//!    ^           |  ^                  |
//!    +-----------+  +---- canceled ----+
//! ```
//!
//! Nothing local changes when the payment session is created. Cart and discount are
//! cleared only when the shopper comes back with a session id, and only once per session.

mod shipping;

pub use shipping::{FieldErrors, ShippingDetails};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use url::form_urlencoded;
use uuid::Uuid;

use crate::boundary::{BoundaryError, CheckoutLineItem, CheckoutSessionRequest, CheckoutSessions, IdentityProvider};
use crate::domain::pricing::OrderTotals;
use crate::notice::Notice;
use crate::store::{CartStore, DiscountValidator, InFlight};

const CANCELED_NOTICE: &str = "Payment was canceled. Your cart and discount are still here.";
const GENERIC_FAILURE: &str = "Failed to start checkout. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckoutStep {
    Shipping,
    Payment,
    Confirmed,
}

/// Marker the hosted payment page appends to the return URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnOutcome {
    Success { session_id: String },
    Canceled,
}

impl ReturnOutcome {
    /// Reads `session_id=...` or `canceled=true` from a form-encoded query string.
    pub fn from_query(query: &str) -> Option<Self> {
        let mut canceled = false;
        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "session_id" if !value.trim().is_empty() => return Some(Self::Success { session_id: value.trim().to_string() }),
                "canceled" | "cancelled" => canceled = value == "true",
                _ => {}
            }
        }
        canceled.then_some(Self::Canceled)
    }
}

/// Where to send the browser next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub url: String,
    pub session_id: String,
    pub order_id: Uuid,
    pub order_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("Your cart is empty")]
    EmptyCart,
    #[error("Please complete your shipping details")]
    ShippingIncomplete,
    #[error("Checkout is not at the payment step")]
    WrongStep,
    #[error("Checkout is already being submitted")]
    InFlight,
    /// The shopper left the page before the response came back.
    #[error("Checkout was abandoned")]
    Abandoned,
    #[error("{0}")]
    Boundary(String),
}

#[derive(Debug)]
struct FlowState {
    step: CheckoutStep,
    shipping: Option<ShippingDetails>,
    notice: Option<Notice>,
    confirmed_session: Option<String>,
}

pub struct CheckoutOrchestrator {
    cart: Arc<CartStore>,
    discounts: Arc<DiscountValidator>,
    sessions: Arc<dyn CheckoutSessions>,
    identity: Arc<dyn IdentityProvider>,
    site_url: String,
    state: Mutex<FlowState>,
    submitting: AtomicBool,
    epoch: AtomicU64,
}

impl CheckoutOrchestrator {
    pub fn new(
        cart: Arc<CartStore>,
        discounts: Arc<DiscountValidator>,
        sessions: Arc<dyn CheckoutSessions>,
        identity: Arc<dyn IdentityProvider>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            cart,
            discounts,
            sessions,
            identity,
            site_url: site_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(FlowState { step: CheckoutStep::Shipping, shipping: None, notice: None, confirmed_session: None }),
            submitting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, FlowState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn step(&self) -> CheckoutStep { self.state().step }
    pub fn shipping(&self) -> Option<ShippingDetails> { self.state().shipping.clone() }
    pub fn notice(&self) -> Option<Notice> { self.state().notice.clone() }
    pub fn dismiss_notice(&self) { self.state().notice = None; }
    pub fn is_submitting(&self) -> bool { self.submitting.load(Ordering::Acquire) }

    /// Initial form values: the stored details if any, otherwise the signed-in profile.
    pub async fn initial_shipping(&self) -> ShippingDetails {
        if let Some(existing) = self.shipping() { return existing; }
        match self.identity.current_user().await {
            Ok(Some(user)) => ShippingDetails::prefilled(&user),
            Ok(None) => ShippingDetails::default(),
            Err(e) => {
                debug!(error = %e, "profile unavailable for prefill");
                ShippingDetails::default()
            }
        }
    }

    /// Validates the form and advances to payment. On failure the step is unchanged.
    pub fn submit_shipping(&self, details: &ShippingDetails) -> Result<(), FieldErrors> {
        let details = details.check()?;
        let mut state = self.state();
        state.shipping = Some(details);
        state.step = CheckoutStep::Payment;
        state.notice = None;
        Ok(())
    }

    /// Payment back to shipping. Other steps are left alone; returns whether it moved.
    pub fn back_to_shipping(&self) -> bool {
        let mut state = self.state();
        if state.step != CheckoutStep::Payment { return false; }
        state.step = CheckoutStep::Shipping;
        true
    }

    /// Totals as of now, from the live cart and the applied discount.
    pub fn totals(&self) -> OrderTotals { OrderTotals::compute(self.cart.total(), self.discounts.applied().as_ref()) }

    /// Marks every outstanding request as stale, e.g. when the shopper navigates away.
    pub fn abandon(&self) { self.epoch.fetch_add(1, Ordering::AcqRel); }

    /// Creates the hosted payment session.
    ///
    /// Waits for any discount validation in flight, recomputes totals from the live cart,
    /// and returns the redirect. Local state is not modified, so a failed call can simply
    /// be retried.
    pub async fn submit_payment(&self) -> Result<PaymentRedirect, CheckoutError> {
        let (shipping, step) = {
            let state = self.state();
            (state.shipping.clone(), state.step)
        };
        if step != CheckoutStep::Payment { return Err(CheckoutError::WrongStep); }
        let shipping = shipping.ok_or(CheckoutError::ShippingIncomplete)?;

        let Some(_flight) = InFlight::try_begin(&self.submitting) else { return Err(CheckoutError::InFlight) };
        let epoch = self.epoch.load(Ordering::Acquire);

        let decision = self.discounts.settled().await.filter(|d| d.valid);
        let cart = self.cart.snapshot();
        if cart.is_empty() { return Err(CheckoutError::EmptyCart); }
        let totals = OrderTotals::compute(cart.total(), decision.as_ref());

        let request = CheckoutSessionRequest {
            items: cart
                .items()
                .iter()
                .map(|i| CheckoutLineItem { id: i.id.clone(), name: i.name.clone(), price: i.price, quantity: i.quantity, image: i.image.clone() })
                .collect(),
            customer_email: shipping.email.clone(),
            shipping_address: shipping,
            discount_code: decision.as_ref().map(|d| d.code.clone()),
            discount_code_id: decision.as_ref().and_then(|d| d.discount_code_id.clone()),
            discount_amount: decision.as_ref().map(|_| totals.discount_amount),
            success_url: format!("{}/checkout?session_id={{CHECKOUT_SESSION_ID}}", self.site_url),
            cancel_url: format!("{}/checkout?canceled=true", self.site_url),
        };

        info!(items = request.items.len(), grand_total = %totals.grand_total, "creating payment session");
        let result = self.sessions.create_session(&request).await;

        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("payment session response arrived after checkout was abandoned");
            return Err(CheckoutError::Abandoned);
        }

        match result {
            Ok(session) => {
                info!(order_number = %session.order_number, session_id = %session.session_id, "redirecting to payment");
                Ok(PaymentRedirect {
                    url: session.url,
                    session_id: session.session_id,
                    order_id: session.order_id,
                    order_number: session.order_number,
                })
            }
            Err(e) => {
                warn!(error = %e, "payment session creation failed");
                let message = boundary_message(&e);
                self.state().notice = Some(Notice::transport(message.clone()));
                Err(CheckoutError::Boundary(message))
            }
        }
    }

    /// Handles the redirect back from the hosted payment page. Returns the resulting step.
    pub fn handle_return(&self, outcome: &ReturnOutcome) -> CheckoutStep {
        match outcome {
            ReturnOutcome::Success { session_id } => {
                let first_arrival = {
                    let mut state = self.state();
                    let first = state.confirmed_session.as_deref() != Some(session_id.as_str());
                    state.confirmed_session = Some(session_id.clone());
                    state.step = CheckoutStep::Confirmed;
                    state.notice = None;
                    first
                };
                if first_arrival {
                    self.cart.clear_cart();
                    self.discounts.remove_discount();
                    info!(session_id = %session_id, "order confirmed, cart and discount cleared");
                }
                CheckoutStep::Confirmed
            }
            ReturnOutcome::Canceled => {
                let mut state = self.state();
                if state.step != CheckoutStep::Confirmed {
                    state.step = if state.shipping.is_some() { CheckoutStep::Payment } else { CheckoutStep::Shipping };
                    state.notice = Some(Notice::info(CANCELED_NOTICE));
                }
                state.step
            }
        }
    }
}

fn boundary_message(err: &BoundaryError) -> String {
    err.server_message().map_or_else(|| GENERIC_FAILURE.to_string(), str::to_string)
}
