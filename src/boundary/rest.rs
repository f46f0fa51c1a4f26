//! HTTP adapter for the hosted backend.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BoundaryError, CheckoutSessionRequest, CheckoutSessionResponse, CheckoutSessions, DiscountAuthority,
    DiscountRequest, IdentityProvider, OrderDetails, OrderReader, User,
};
use crate::config::BackendConfig;
use crate::domain::aggregates::TrackingEvent;
use crate::domain::pricing::DiscountDecision;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for the auth, RPC and functions endpoints of the hosted backend.
///
/// Constructed without a [`BackendConfig`] it stays usable but every call fails with
/// [`BoundaryError::Unconfigured`].
pub struct RestBackend {
    http: Client,
    config: Option<BackendConfig>,
    access_token: RwLock<Option<String>>,
    auth_tx: watch::Sender<Option<User>>,
}

#[derive(Deserialize)]
struct AuthUser {
    id: Uuid,
    email: Option<String>,
    #[serde(default)]
    user_metadata: AuthUserMetadata,
}

#[derive(Default, Deserialize)]
struct AuthUserMetadata {
    first_name: Option<String>,
    last_name: Option<String>,
}

impl From<AuthUser> for User {
    fn from(u: AuthUser) -> Self {
        User { id: u.id, email: u.email, first_name: u.user_metadata.first_name, last_name: u.user_metadata.last_name }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

impl RestBackend {
    pub fn new(config: Option<BackendConfig>) -> Self {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
        let (auth_tx, _) = watch::channel(None);
        Self { http, config, access_token: RwLock::new(None), auth_tx }
    }

    pub fn unconfigured() -> Self { Self::new(None) }

    pub fn is_configured(&self) -> bool { self.config.is_some() }

    /// Installs the session token obtained from the sign-in flow, or clears it.
    pub fn set_access_token(&self, token: Option<String>) {
        if token.is_none() { self.auth_tx.send_replace(None); }
        *self.access_token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn config(&self) -> Result<&BackendConfig, BoundaryError> { self.config.as_ref().ok_or(BoundaryError::Unconfigured) }

    fn request(&self, method: Method, url: String, token: Option<&str>) -> Result<RequestBuilder, BoundaryError> {
        let config = self.config()?;
        let bearer = token.unwrap_or(&config.anon_key);
        Ok(self.http.request(method, url).header("apikey", &config.anon_key).bearer_auth(bearer))
    }

    /// Looks up the user a bearer token belongs to. An expired or revoked token is `None`.
    pub async fn user_for_token(&self, token: &str) -> Result<Option<User>, BoundaryError> {
        let url = format!("{}/auth/v1/user", self.config()?.url);
        let resp = self.request(Method::GET, url, Some(token))?.send().await?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(None);
        }
        let user: AuthUser = read_json(resp).await?;
        Ok(Some(user.into()))
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, BoundaryError> {
        let token = self.access_token();
        let resp = self.request(Method::GET, url, token.as_deref())?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND { return Ok(None); }
        read_json(resp).await.map(Some)
    }
}

/// Decodes a success body, or turns an error status into [`BoundaryError::Rejected`]
/// carrying the server's own message.
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, BoundaryError> {
    let status = resp.status();
    if status.is_success() { return Ok(resp.json().await?); }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.error.or(b.message).or(b.msg))
        .unwrap_or_else(|| if text.is_empty() { status.to_string() } else { text });
    Err(BoundaryError::Rejected { status: status.as_u16(), message })
}

#[async_trait]
impl IdentityProvider for RestBackend {
    async fn current_user(&self) -> Result<Option<User>, BoundaryError> {
        let Some(token) = self.access_token() else { return Ok(None) };
        let user = self.user_for_token(&token).await?;
        if user.is_none() {
            debug!("session token rejected, treating as signed out");
            self.set_access_token(None);
        }
        self.auth_tx.send_if_modified(|current| {
            if *current == user { return false; }
            current.clone_from(&user);
            true
        });
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BoundaryError> {
        if let Some(token) = self.access_token() {
            let url = format!("{}/auth/v1/logout", self.config()?.url);
            match self.request(Method::POST, url, Some(&token))?.send().await {
                Ok(resp) if !resp.status().is_success() => warn!(status = %resp.status(), "logout rejected"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "logout request failed; clearing local session anyway"),
            }
        }
        self.set_access_token(None);
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<Option<User>> { self.auth_tx.subscribe() }
}

#[async_trait]
impl DiscountAuthority for RestBackend {
    async fn validate(&self, request: &DiscountRequest) -> Result<DiscountDecision, BoundaryError> {
        let url = format!("{}/rest/v1/rpc/validate_discount_code", self.config()?.url);
        let token = self.access_token();
        let resp = self.request(Method::POST, url, token.as_deref())?.json(request).send().await?;
        read_json(resp).await
    }
}

#[async_trait]
impl CheckoutSessions for RestBackend {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<CheckoutSessionResponse, BoundaryError> {
        let url = format!("{}/create-checkout-session", self.config()?.functions_url);
        let token = self.access_token();
        let resp = self.request(Method::POST, url, token.as_deref())?.json(request).send().await?;
        read_json(resp).await
    }
}

#[async_trait]
impl OrderReader for RestBackend {
    async fn order(&self, id: Uuid) -> Result<Option<OrderDetails>, BoundaryError> {
        let url = format!("{}/orders/{id}", self.config()?.functions_url);
        self.get_optional(url).await
    }

    async fn order_by_session(&self, session_id: &str) -> Result<Option<OrderDetails>, BoundaryError> {
        let url = format!("{}/sessions/{session_id}/order", self.config()?.functions_url);
        self.get_optional(url).await
    }

    async fn tracking(&self, order_id: Uuid) -> Result<Vec<TrackingEvent>, BoundaryError> {
        let url = format!("{}/orders/{order_id}/tracking", self.config()?.functions_url);
        Ok(self.get_optional(url).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Json as JsonBody, http::HeaderMap, routing::{get, post}, Json, Router};
    use rust_decimal::Decimal;
    use serde_json::json;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn unconfigured_backend_fails_every_call() {
        let backend = RestBackend::unconfigured();
        backend.set_access_token(Some("t".into()));
        assert_eq!(backend.current_user().await, Err(BoundaryError::Unconfigured));
        assert_eq!(backend.order(Uuid::nil()).await, Err(BoundaryError::Unconfigured));
    }

    #[tokio::test]
    async fn signed_out_without_token() {
        let backend = RestBackend::unconfigured();
        assert_eq!(backend.current_user().await, Ok(None));
    }

    #[tokio::test]
    async fn resolves_user_and_publishes_auth_state() {
        let id = Uuid::now_v7();
        let router = Router::new().route(
            "/auth/v1/user",
            get(move |headers: HeaderMap| async move {
                assert_eq!(headers["authorization"], "Bearer user-token");
                Json(json!({"id": id, "email": "ada@example.com", "user_metadata": {"first_name": "Ada"}}))
            }),
        );
        let backend = RestBackend::new(Some(BackendConfig::new(spawn(router).await, "anon")));
        let state = backend.auth_state();
        backend.set_access_token(Some("user-token".into()));

        let user = backend.current_user().await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(state.borrow().as_ref().map(|u| u.id), Some(id));
    }

    #[tokio::test]
    async fn rpc_rejection_carries_server_message() {
        let router = Router::new().route(
            "/rest/v1/rpc/validate_discount_code",
            post(|JsonBody(body): JsonBody<serde_json::Value>| async move {
                assert_eq!(body["code"], "SPRING");
                (axum::http::StatusCode::BAD_REQUEST, Json(json!({"message": "function error"})))
            }),
        );
        let backend = RestBackend::new(Some(BackendConfig::new(spawn(router).await, "anon")));
        let request = DiscountRequest { code: "SPRING".into(), order_total: Decimal::new(50, 0), user_id: Uuid::nil() };
        let err = backend.validate(&request).await.unwrap_err();
        assert_eq!(err, BoundaryError::Rejected { status: 400, message: "function error".into() });
    }

    #[tokio::test]
    async fn missing_order_is_none() {
        let router = Router::new().route(
            "/functions/v1/orders/:id",
            get(|| async { axum::http::StatusCode::NOT_FOUND }),
        );
        let backend = RestBackend::new(Some(BackendConfig::new(spawn(router).await, "anon")));
        assert_eq!(backend.order(Uuid::now_v7()).await, Ok(None));
    }
}
