//! Payment boundary service.
//!
//! Creates hosted payment sessions from recomputed totals, records payment outcomes from
//! the processor's webhook and serves the order pages. Every handler shares one
//! [`AppState`].

pub mod checkout_session;
pub mod email;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, warn};

use self::email::{HttpMailer, LogMailer, Mailer};
use self::payments::{PaymentProcessor, StripeProcessor, UnconfiguredProcessor};
use self::pricing::PricingError;
use crate::boundary::rest::RestBackend;
use crate::boundary::{BoundaryError, DiscountAuthority, User};
use crate::config::Config;
use crate::domain::aggregates::OrderError;
use crate::domain::events::OrderEvent;

/// Resolves the user a bearer token belongs to.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn user_for_token(&self, token: &str) -> Result<Option<User>, BoundaryError>;
}

#[async_trait]
impl TokenResolver for RestBackend {
    async fn user_for_token(&self, token: &str) -> Result<Option<User>, BoundaryError> {
        RestBackend::user_for_token(self, token).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub nats: Option<async_nats::Client>,
    pub users: Arc<dyn TokenResolver>,
    pub discounts: Arc<dyn DiscountAuthority>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub mailer: Arc<dyn Mailer>,
    pub webhook_secret: Option<String>,
    pub admin_key: Option<String>,
    pub currency: String,
    pub site_url: String,
}

impl AppState {
    pub fn from_config(config: &Config, db: PgPool, nats: Option<async_nats::Client>) -> Self {
        let backend = Arc::new(RestBackend::new(config.backend.clone()));
        let server = &config.server;

        let payments: Arc<dyn PaymentProcessor> = match &server.payment_secret_key {
            Some(key) => Arc::new(StripeProcessor::new(key.clone())),
            None => {
                error!("PAYMENT_SECRET_KEY not set; checkout sessions will be refused");
                Arc::new(UnconfiguredProcessor)
            }
        };
        let mailer: Arc<dyn Mailer> = match &server.email {
            Some(cfg) => Arc::new(HttpMailer::new(cfg.clone())),
            None => {
                warn!("EMAIL_API_KEY or EMAIL_FROM not set; confirmation emails are only logged");
                Arc::new(LogMailer)
            }
        };
        if server.payment_webhook_secret.is_none() {
            error!("PAYMENT_WEBHOOK_SECRET not set; payment webhooks will be rejected");
        }

        Self {
            db,
            nats,
            users: backend.clone(),
            discounts: backend,
            payments,
            mailer,
            webhook_secret: server.payment_webhook_secret.clone(),
            admin_key: server.admin_api_key.clone(),
            currency: server.currency.clone(),
            site_url: config.site_url.clone(),
        }
    }

    /// The signed-in caller, `None` without a usable bearer token.
    pub(crate) async fn caller(&self, headers: &HeaderMap) -> Result<Option<User>, ApiError> {
        let Some(token) = bearer(headers) else { return Ok(None) };
        Ok(self.users.user_for_token(token).await?)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "glow-storefront"})) }))
        .route("/functions/v1/create-checkout-session", post(checkout_session::create_checkout_session))
        .route("/functions/v1/payment-webhook", post(webhook::payment_webhook))
        .route("/functions/v1/orders/:id", get(orders::get_order))
        .route("/functions/v1/orders/:id/tracking", get(orders::get_tracking))
        .route("/functions/v1/orders/:id/status", put(orders::update_status))
        .route("/functions/v1/sessions/:session_id/order", get(orders::get_order_by_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

/// Publishes an order event when messaging is configured. Failures are logged only.
pub(crate) async fn publish(nats: &Option<async_nats::Client>, event: &OrderEvent) {
    let Some(client) = nats else { return };
    let payload = match serde_json::to_vec(event) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "order event not serializable");
            return;
        }
    };
    match client.publish(event.subject().to_string(), payload.into()).await {
        Ok(()) => debug!(subject = event.subject(), "order event published"),
        Err(e) => warn!(subject = event.subject(), error = %e, "order event publish failed"),
    }
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Order not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Service is not configured")]
    Unavailable,
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "request failed");
        }
        (self.status(), Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self { Self::Internal(e.to_string()) }
}

impl From<BoundaryError> for ApiError {
    fn from(e: BoundaryError) -> Self {
        match e {
            BoundaryError::Unconfigured => Self::Unavailable,
            BoundaryError::Rejected { message, .. } => Self::Upstream(message),
            other => {
                warn!(error = %other, "upstream call failed");
                Self::Upstream("Upstream service unavailable".to_string())
            }
        }
    }
}

impl From<PricingError> for ApiError {
    fn from(e: PricingError) -> Self { Self::BadRequest(e.to_string()) }
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::UnknownStatus(_) => Self::BadRequest(e.to_string()),
            OrderError::IllegalTransition { .. } => Self::Conflict(e.to_string()),
        }
    }
}
