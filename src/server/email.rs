//! Order confirmation email.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::boundary::BoundaryError;
use crate::config::EmailConfig;
use crate::domain::aggregates::{Order, OrderItem};

const EMAIL_API: &str = "https://api.resend.com/emails";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), BoundaryError>;
}

/// Writes emails to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), BoundaryError> {
        info!(to = %email.to, subject = %email.subject, "email delivery disabled, not sent");
        Ok(())
    }
}

pub struct HttpMailer {
    http: Client,
    config: EmailConfig,
    endpoint: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl HttpMailer {
    pub fn new(config: EmailConfig) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(15)).build().unwrap_or_default();
        Self { http, config, endpoint: EMAIL_API.to_string() }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), BoundaryError> {
        let body = SendRequest { from: &self.config.from, to: [&email.to], subject: &email.subject, html: &email.html };
        let resp = self.http.post(&self.endpoint).bearer_auth(&self.config.api_key).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BoundaryError::Rejected { status: status.as_u16(), message });
        }
        debug!(to = %email.to, "email sent");
        Ok(())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Confirmation sent once payment has been recorded.
pub fn order_confirmation(order: &Order, items: &[OrderItem]) -> Email {
    let rows: String = items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{}</td><td>{}</td><td style=\"text-align:right\">{}</td></tr>",
                escape(&item.name),
                item.quantity,
                item.total
            )
        })
        .collect();

    let mut summary = format!("<tr><td colspan=\"2\">Subtotal</td><td style=\"text-align:right\">{}</td></tr>", order.subtotal);
    if !order.discount.amount().is_zero() {
        summary.push_str(&format!("<tr><td colspan=\"2\">Discount</td><td style=\"text-align:right\">-{}</td></tr>", order.discount));
    }
    summary.push_str(&format!("<tr><td colspan=\"2\">Tax</td><td style=\"text-align:right\">{}</td></tr>", order.tax));
    summary.push_str(&format!("<tr><td colspan=\"2\"><strong>Total</strong></td><td style=\"text-align:right\"><strong>{}</strong></td></tr>", order.total));

    let html = format!(
        "<h1>Thank you for your order!</h1>\
         <p>We've received your payment for order <strong>{number}</strong> and are getting it ready.</p>\
         <table width=\"100%\">{rows}{summary}</table>\
         <p>You can follow your order's progress from your account at any time.</p>",
        number = escape(&order.order_number),
    );

    Email { to: order.customer_email.clone(), subject: format!("Order confirmed: {}", order.order_number), html }
}
