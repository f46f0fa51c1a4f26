//! External collaborators of the storefront core.
//!
//! Identity, discount validation, checkout-session creation and order reads all live on
//! the hosted backend. The core only sees these traits; [`rest::RestBackend`] speaks HTTP
//! to the real services and tests substitute in-memory fakes.

pub mod rest;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::checkout::ShippingDetails;
use crate::domain::aggregates::{Order, OrderItem, TrackingEvent};
use crate::domain::pricing::DiscountDecision;
use crate::domain::value_objects::ProductId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoundaryError {
    #[error("backend is not configured")]
    Unconfigured,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BoundaryError {
    /// Message the boundary itself supplied, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BoundaryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() { Self::Decode(err.to_string()) } else { Self::Transport(err.to_string()) }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves the signed-in user at call time, `None` when signed out.
    async fn current_user(&self) -> Result<Option<User>, BoundaryError>;
    async fn sign_out(&self) -> Result<(), BoundaryError>;
    /// Latest known user, updated on every sign-in, sign-out and refresh.
    fn auth_state(&self) -> watch::Receiver<Option<User>>;
}

/// Arguments of the discount validation procedure.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiscountRequest {
    pub code: String,
    pub order_total: Decimal,
    pub user_id: Uuid,
}

#[async_trait]
pub trait DiscountAuthority: Send + Sync {
    async fn validate(&self, request: &DiscountRequest) -> Result<DiscountDecision, BoundaryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub image: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub items: Vec<CheckoutLineItem>,
    pub shipping_address: ShippingDetails,
    pub customer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_code_id: Option<String>,
    /// Client-side figure, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionResponse {
    pub url: String,
    pub session_id: String,
    pub order_id: Uuid,
    pub order_number: String,
}

#[async_trait]
pub trait CheckoutSessions: Send + Sync {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<CheckoutSessionResponse, BoundaryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[async_trait]
pub trait OrderReader: Send + Sync {
    async fn order(&self, id: Uuid) -> Result<Option<OrderDetails>, BoundaryError>;
    async fn order_by_session(&self, session_id: &str) -> Result<Option<OrderDetails>, BoundaryError>;
    async fn tracking(&self, order_id: Uuid) -> Result<Vec<TrackingEvent>, BoundaryError>;
}
