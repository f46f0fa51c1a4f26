//! Payment processor webhook.
//!
//! The only place an order becomes paid. Events are verified against the shared signing
//! secret before anything is parsed. Replays and events for unknown orders are
//! acknowledged so the processor stops retrying them.

use std::collections::HashMap;

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::email::order_confirmation;
use super::orders::{self, OrderKey};
use super::{publish, ApiError, AppState};
use crate::domain::aggregates::{Order, TrackingEvent};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age of a signed timestamp, in seconds.
const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Checks a `t=<unix>,v1=<hex>` header: HMAC-SHA256 over `"{t}.{payload}"`.
pub fn verify_signature(header: &str, payload: &[u8], secret: &str, now: i64) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - timestamp).abs() > TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else { continue };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: SessionObject,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl WebhookEvent {
    /// What the event means for the order, `None` for events that change nothing.
    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match self.event_type.as_str() {
            // Delayed payment methods complete unpaid; the async events settle them.
            "checkout.session.completed" => match self.data.object.payment_status.as_deref() {
                Some("unpaid") => None,
                _ => Some(PaymentOutcome::Paid),
            },
            "checkout.session.async_payment_succeeded" => Some(PaymentOutcome::Paid),
            "checkout.session.async_payment_failed" | "checkout.session.expired" => Some(PaymentOutcome::Failed),
            _ => None,
        }
    }

    fn order_id(&self) -> Option<Uuid> { self.data.object.metadata.get("order_id").and_then(|id| id.parse().ok()) }
}

fn received() -> Json<serde_json::Value> { Json(serde_json::json!({"received": true})) }

pub async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(secret) = s.webhook_secret.as_deref() else {
        error!("payment webhook received but no signing secret is configured");
        return Err(ApiError::Unavailable);
    };
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing signature".to_string()))?;
    verify_signature(header, &body, secret, Utc::now().timestamp()).map_err(|e| {
        warn!(error = %e, "webhook signature rejected");
        ApiError::BadRequest(format!("Webhook error: {e}"))
    })?;

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid payload: {e}")))?;
    let Some(outcome) = event.outcome() else {
        debug!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
        return Ok(received());
    };

    apply(&s, &event, outcome).await?;
    Ok(received())
}

async fn apply(s: &AppState, event: &WebhookEvent, outcome: PaymentOutcome) -> Result<(), ApiError> {
    let session_id = event.data.object.id.as_str();
    let mut tx = s.db.begin().await?;

    let mut order = match event.order_id() {
        Some(id) => orders::fetch_order(&mut *tx, OrderKey::Id(id), true).await?,
        None => None,
    };
    if order.is_none() && !session_id.is_empty() {
        order = orders::fetch_order(&mut *tx, OrderKey::Session(session_id), true).await?;
    }
    let Some(mut order) = order else {
        warn!(event_id = %event.id, session_id, "webhook for unknown order acknowledged");
        return Ok(());
    };

    let (change, note) = match outcome {
        PaymentOutcome::Paid => (order.mark_paid(), "Payment received"),
        PaymentOutcome::Failed => (order.mark_payment_failed(), "Payment failed"),
    };
    let Some(change) = change else {
        debug!(order_number = %order.order_number, ?outcome, "payment outcome already recorded");
        return Ok(());
    };

    orders::save_status(&mut *tx, &order).await?;
    if order.payment_session_id.is_none() && !session_id.is_empty() {
        orders::attach_session(&mut *tx, order.id, session_id).await?;
    }
    orders::insert_tracking(&mut *tx, &TrackingEvent::new(order.id, order.status, None, Some(note.to_string()))).await?;
    tx.commit().await?;
    info!(order_number = %order.order_number, payment_status = order.payment_status.as_str(), "payment outcome recorded");

    if outcome == PaymentOutcome::Paid {
        send_confirmation(s, &order).await;
    }
    publish(&s.nats, &change).await;
    Ok(())
}

/// Email failures never undo a recorded payment.
async fn send_confirmation(s: &AppState, order: &Order) {
    let items = match orders::fetch_items(&s.db, order).await {
        Ok(items) => items,
        Err(e) => {
            warn!(order_number = %order.order_number, error = %e, "order items unavailable for confirmation email");
            Vec::new()
        }
    };
    if let Err(e) = s.mailer.send(&order_confirmation(order, &items)).await {
        warn!(order_number = %order.order_number, error = %e, "confirmation email failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{call, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn sign(payload: &str, secret: &str, t: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{t}.{payload}").as_bytes());
        format!("t={t},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn event(kind: &str, payment_status: &str) -> WebhookEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": kind,
            "data": {"object": {"id": "cs_1", "payment_status": payment_status, "metadata": {"order_id": Uuid::nil()}}}
        }))
        .unwrap()
    }

    #[test]
    fn accepts_valid_signature() {
        let header = sign("{}", "whsec", 1_700_000_000);
        assert_eq!(verify_signature(&header, b"{}", "whsec", 1_700_000_100), Ok(()));
    }

    #[test]
    fn rejects_tampering_and_stale_timestamps() {
        let header = sign("{\"a\":1}", "whsec", 1_700_000_000);
        assert_eq!(verify_signature(&header, b"{\"a\":2}", "whsec", 1_700_000_000), Err(SignatureError::Mismatch));
        assert_eq!(verify_signature(&header, b"{\"a\":1}", "other", 1_700_000_000), Err(SignatureError::Mismatch));
        assert_eq!(verify_signature(&header, b"{\"a\":1}", "whsec", 1_700_000_301), Err(SignatureError::Expired));
        assert_eq!(verify_signature("v1=abcd", b"", "whsec", 0), Err(SignatureError::Malformed));
        assert_eq!(verify_signature("t=5", b"", "whsec", 5), Err(SignatureError::Malformed));
    }

    #[test]
    fn any_matching_v1_signature_passes() {
        let good = sign("{}", "whsec", 100);
        let header = format!("t=100,v1=deadbeef,{}", good.split(',').nth(1).unwrap());
        assert_eq!(verify_signature(&header, b"{}", "whsec", 100), Ok(()));
    }

    #[test]
    fn maps_events_to_outcomes() {
        assert_eq!(event("checkout.session.completed", "paid").outcome(), Some(PaymentOutcome::Paid));
        assert_eq!(event("checkout.session.completed", "unpaid").outcome(), None);
        assert_eq!(event("checkout.session.async_payment_succeeded", "paid").outcome(), Some(PaymentOutcome::Paid));
        assert_eq!(event("checkout.session.async_payment_failed", "unpaid").outcome(), Some(PaymentOutcome::Failed));
        assert_eq!(event("checkout.session.expired", "unpaid").outcome(), Some(PaymentOutcome::Failed));
        assert_eq!(event("customer.created", "").outcome(), None);
        assert_eq!(event("checkout.session.completed", "paid").order_id(), Some(Uuid::nil()));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let request = Request::post("/functions/v1/payment-webhook")
            .header(SIGNATURE_HEADER, format!("t={},v1=00", Utc::now().timestamp()))
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = call(state(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Webhook error: signature mismatch");
    }

    #[tokio::test]
    async fn ignored_event_is_acknowledged() {
        let payload = r#"{"id":"evt_2","type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        let request = Request::post("/functions/v1/payment-webhook")
            .header(SIGNATURE_HEADER, sign(payload, "whsec_test", Utc::now().timestamp()))
            .body(Body::from(payload))
            .unwrap();
        let (status, body) = call(state(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }

    #[tokio::test]
    async fn missing_secret_refuses_webhooks() {
        let mut s = state();
        s.webhook_secret = None;
        let request = Request::post("/functions/v1/payment-webhook").body(Body::from("{}")).unwrap();
        let (status, _) = call(s, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
