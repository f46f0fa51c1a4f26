//! Hosted payment sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

use super::pricing::AuthoritativeTotals;
use crate::boundary::BoundaryError;

const STRIPE_API: &str = "https://api.stripe.com/v1";

/// Order data the processor needs to build a session.
#[derive(Debug)]
pub struct SessionOrder<'a> {
    pub order_id: Uuid,
    pub order_number: &'a str,
    pub customer_email: &'a str,
    pub currency: &'a str,
    pub discount_code: Option<&'a str>,
    pub totals: &'a AuthoritativeTotals,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_session(&self, order: &SessionOrder<'_>) -> Result<PaymentSession, BoundaryError>;
}

/// Used when no secret key is configured; refuses every session.
pub struct UnconfiguredProcessor;

#[async_trait]
impl PaymentProcessor for UnconfiguredProcessor {
    async fn create_session(&self, order: &SessionOrder<'_>) -> Result<PaymentSession, BoundaryError> {
        error!(order_number = order.order_number, "payment processor not configured");
        Err(BoundaryError::Unconfigured)
    }
}

pub struct StripeProcessor {
    http: Client,
    secret_key: String,
    api_base: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeError,
}

#[derive(Deserialize)]
struct StripeError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct Coupon {
    id: String,
}

impl StripeProcessor {
    pub fn new(secret_key: impl Into<String>) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self { http, secret_key: secret_key.into(), api_base: STRIPE_API.to_string() }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, path: &str, form: &[(String, String)]) -> Result<T, BoundaryError> {
        let resp = self.http.post(format!("{}{path}", self.api_base)).bearer_auth(&self.secret_key).form(form).send().await?;
        decode(resp).await
    }

    /// One-off coupon carrying the recomputed discount.
    async fn coupon(&self, order: &SessionOrder<'_>) -> Result<Coupon, BoundaryError> {
        let mut form = vec![
            ("amount_off".to_string(), order.totals.discount.to_string()),
            ("currency".to_string(), order.currency.to_string()),
            ("duration".to_string(), "once".to_string()),
            ("max_redemptions".to_string(), "1".to_string()),
        ];
        if let Some(code) = order.discount_code { form.push(("name".to_string(), code.to_string())); }
        self.post("/coupons", &form).await
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, BoundaryError> {
    let status = resp.status();
    if status.is_success() { return Ok(resp.json().await?); }
    let message = resp
        .json::<StripeErrorBody>()
        .await
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| format!("payment processor returned {status}"));
    Err(BoundaryError::Rejected { status: status.as_u16(), message })
}

/// Form fields for a checkout session: product lines plus a tax line.
pub fn session_form(order: &SessionOrder<'_>, coupon_id: Option<&str>) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), order.success_url.to_string()),
        ("cancel_url".to_string(), order.cancel_url.to_string()),
        ("customer_email".to_string(), order.customer_email.to_string()),
        ("client_reference_id".to_string(), order.order_id.to_string()),
        ("metadata[order_id]".to_string(), order.order_id.to_string()),
        ("metadata[order_number]".to_string(), order.order_number.to_string()),
    ];

    let mut push_line = |n: usize, name: &str, image: Option<&str>, unit_amount: i64, quantity: u32| {
        let key = |field: &str| format!("line_items[{n}]{field}");
        form.push((key("[price_data][currency]"), order.currency.to_string()));
        form.push((key("[price_data][product_data][name]"), name.to_string()));
        if let Some(image) = image.filter(|i| i.starts_with("https://")) {
            form.push((key("[price_data][product_data][images][0]"), image.to_string()));
        }
        form.push((key("[price_data][unit_amount]"), unit_amount.to_string()));
        form.push((key("[quantity]"), quantity.to_string()));
    };

    let lines = &order.totals.lines;
    for (n, line) in lines.iter().enumerate() {
        push_line(n, &line.name, Some(line.image.as_str()), line.unit_amount, line.quantity);
    }
    if order.totals.tax > 0 {
        push_line(lines.len(), "Sales tax (8%)", None, order.totals.tax, 1);
    }

    if let Some(coupon) = coupon_id {
        form.push(("discounts[0][coupon]".to_string(), coupon.to_string()));
    }
    form
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_session(&self, order: &SessionOrder<'_>) -> Result<PaymentSession, BoundaryError> {
        let coupon = if order.totals.discount > 0 { Some(self.coupon(order).await?) } else { None };
        let form = session_form(order, coupon.as_ref().map(|c| c.id.as_str()));
        let session: PaymentSession = self.post("/checkout/sessions", &form).await?;
        debug!(session_id = %session.id, order_number = order.order_number, "payment session created");
        Ok(session)
    }
}
