//! Checkout-session creation.
//!
//! Builds the order from the submitted line items and a freshly re-validated discount.
//! The pending order is committed before the processor is called, so a live session always
//! points at a stored order. A session that cannot be created cancels the order.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::orders::PendingOrders;
use super::payments::{PaymentProcessor, PaymentSession, SessionOrder};
use super::pricing::{recompute, to_cents, AuthoritativeTotals};
use super::{publish, ApiError, AppState};
use crate::boundary::{CheckoutSessionRequest, CheckoutSessionResponse, DiscountRequest, User};
use crate::domain::aggregates::{Order, OrderItem, OrderStatus, PaymentStatus};
use crate::domain::events::OrderEvent;
use crate::domain::pricing::DiscountDecision;
use crate::domain::value_objects::Money;
use crate::store::discount::normalize_code;

const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `ORD-` followed by the base-36 millisecond timestamp and a random suffix.
pub fn order_number(now: DateTime<Utc>) -> String {
    let mut n = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    let mut stamp = Vec::new();
    loop {
        stamp.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    let stamp: String = stamp.into_iter().rev().collect();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4).map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char).collect();
    format!("ORD-{stamp}-{suffix}")
}

/// Keeps return URLs on the storefront's own origin.
fn return_url(candidate: &str, site_url: &str, fallback: &str) -> String {
    if candidate.starts_with(&format!("{site_url}/")) {
        candidate.to_string()
    } else {
        warn!(url = candidate, "return url outside the storefront replaced");
        format!("{site_url}{fallback}")
    }
}

async fn revalidate_discount(
    s: &AppState,
    req: &CheckoutSessionRequest,
    user: &User,
    subtotal_cents: i64,
) -> Result<Option<DiscountDecision>, ApiError> {
    let Some(code) = req.discount_code.as_deref().map(normalize_code).filter(|c| !c.is_empty()) else {
        if req.discount_code_id.is_some() {
            warn!(user_id = %user.id, "discount id submitted without a code; ignored");
        }
        return Ok(None);
    };

    let request = DiscountRequest { code, order_total: Decimal::new(subtotal_cents, 2), user_id: user.id };
    let decision = s.discounts.validate(&request).await?;
    if !decision.valid {
        let reason = decision.error.unwrap_or_else(|| "Invalid discount code".to_string());
        info!(code = %request.code, reason = %reason, "discount rejected at checkout");
        return Err(ApiError::BadRequest(reason));
    }
    if let (Some(claimed), Some(actual)) = (&req.discount_code_id, &decision.discount_code_id) {
        if claimed != actual {
            return Err(ApiError::BadRequest("Discount code has changed, please apply it again".to_string()));
        }
    }
    Ok(Some(decision))
}

fn build_order(
    user: &User,
    customer_email: String,
    shipping_address: serde_json::Value,
    totals: &AuthoritativeTotals,
    decision: Option<&DiscountDecision>,
    currency: &str,
) -> (Order, Vec<OrderItem>) {
    let now = Utc::now();
    let order = Order {
        id: Uuid::now_v7(),
        order_number: order_number(now),
        user_id: Some(user.id),
        customer_email,
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        subtotal: Money::from_minor(totals.subtotal, currency),
        discount: Money::from_minor(totals.discount, currency),
        tax: Money::from_minor(totals.tax, currency),
        total: Money::from_minor(totals.total, currency),
        shipping_address,
        discount_code_id: decision.and_then(|d| d.discount_code_id.clone()),
        payment_session_id: None,
        created_at: now,
        updated_at: now,
    };
    let items = totals
        .lines
        .iter()
        .map(|line| OrderItem {
            id: Uuid::now_v7(),
            order_id: order.id,
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: Money::from_minor(line.unit_amount, currency),
            total: Money::from_minor(line.line_total, currency),
        })
        .collect();
    (order, items)
}

/// Records the pending order, asks the processor for a session and links the two.
async fn open_session(
    ledger: &dyn PendingOrders,
    payments: &dyn PaymentProcessor,
    order: &Order,
    items: &[OrderItem],
    request: &SessionOrder<'_>,
) -> Result<PaymentSession, ApiError> {
    ledger.record_pending(order, items).await?;
    let session = match payments.create_session(request).await {
        Ok(session) => session,
        Err(e) => {
            if let Err(cancel) = ledger.abandon(order).await {
                warn!(order_number = %order.order_number, error = %cancel, "could not cancel order after session failure");
            }
            return Err(e.into());
        }
    };
    // The webhook still matches on the order id carried in the session metadata.
    if let Err(e) = ledger.link_session(order.id, &session.id).await {
        warn!(order_number = %order.order_number, session_id = %session.id, error = %e, "session id not stored on order");
    }
    Ok(session)
}

pub async fn create_checkout_session(
    State(s): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckoutSessionRequest>,
) -> Result<Json<CheckoutSessionResponse>, ApiError> {
    let undiscounted = recompute(&req.items, None)?;
    let shipping = req.shipping_address.check().map_err(|errors| {
        let first = errors.into_values().next().unwrap_or_else(|| "Shipping details are incomplete".to_string());
        ApiError::BadRequest(first)
    })?;
    let customer_email = match req.customer_email.trim() {
        "" => shipping.email.clone(),
        email => email.to_string(),
    };

    let user = s.caller(&headers).await?.ok_or(ApiError::Unauthorized)?;
    let decision = revalidate_discount(&s, &req, &user, undiscounted.subtotal).await?;
    let totals = recompute(&req.items, decision.as_ref())?;
    if let Some(claimed) = req.discount_amount {
        if to_cents(claimed) != Some(totals.discount) {
            warn!(claimed = %claimed, recomputed = totals.discount, "client discount differs from recomputed discount");
        }
    }

    let shipping_address = serde_json::to_value(&shipping).map_err(|e| ApiError::Internal(e.to_string()))?;
    let (order, items) = build_order(&user, customer_email, shipping_address, &totals, decision.as_ref(), &s.currency);

    let success_url = return_url(&req.success_url, &s.site_url, "/checkout?session_id={CHECKOUT_SESSION_ID}");
    let cancel_url = return_url(&req.cancel_url, &s.site_url, "/checkout?canceled=true");

    let request = SessionOrder {
        order_id: order.id,
        order_number: &order.order_number,
        customer_email: &order.customer_email,
        currency: &s.currency,
        discount_code: decision.as_ref().map(|d| d.code.as_str()),
        totals: &totals,
        success_url: &success_url,
        cancel_url: &cancel_url,
    };
    let session = open_session(&s.db, s.payments.as_ref(), &order, &items, &request).await?;

    info!(order_number = %order.order_number, session_id = %session.id, total = totals.total, "checkout session created");
    publish(&s.nats, &OrderEvent::Created { order_id: order.id, order_number: order.order_number.clone(), total: order.total.amount() }).await;

    Ok(Json(CheckoutSessionResponse { url: session.url, session_id: session.id, order_id: order.id, order_number: order.order_number }))
}
