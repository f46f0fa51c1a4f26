//! Environment configuration.
//!
//! `.env` is loaded by the binary before [`Config::from_env`] runs. Missing or malformed
//! backend settings are logged and leave the storefront in a non-functional but running
//! state: every remote call then fails with [`crate::boundary::BoundaryError::Unconfigured`].

use tracing::{error, warn};

/// Hosted backend endpoint and public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    /// Base path of the serverless functions; defaults to `{url}/functions/v1`.
    pub functions_url: String,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        let functions_url = format!("{url}/functions/v1");
        Self { url, anon_key: anon_key.into(), functions_url }
    }

    pub fn with_functions_url(mut self, functions_url: impl Into<String>) -> Self {
        self.functions_url = functions_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
}

/// Settings only the boundary service needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub payment_secret_key: Option<String>,
    pub payment_webhook_secret: Option<String>,
    pub email: Option<EmailConfig>,
    pub nats_url: Option<String>,
    /// Shared secret for staff endpoints; they refuse every call when unset.
    pub admin_api_key: Option<String>,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub backend: Option<BackendConfig>,
    pub site_url: String,
    pub server: ServerConfig,
}

impl Config {
    pub fn from_env() -> Self { Self::from_lookup(|key| std::env::var(key).ok()) }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = match (var("BACKEND_URL"), var("BACKEND_ANON_KEY")) {
            (Some(url), Some(key)) if url.starts_with("http://") || url.starts_with("https://") => {
                let cfg = BackendConfig::new(url, key);
                Some(match var("FUNCTIONS_URL") { Some(f) => cfg.with_functions_url(f), None => cfg })
            }
            (Some(url), Some(_)) => {
                error!(url = %url, "BACKEND_URL is not an http(s) URL; storefront backend disabled");
                None
            }
            _ => {
                error!("BACKEND_URL or BACKEND_ANON_KEY not set; storefront backend disabled");
                None
            }
        };

        let port = match var("PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(port = %raw, "invalid PORT, using 8083");
                8083
            }),
            None => 8083,
        };

        let email = match (var("EMAIL_API_KEY"), var("EMAIL_FROM")) {
            (Some(api_key), Some(from)) => Some(EmailConfig { api_key, from }),
            _ => None,
        };

        Self {
            backend,
            site_url: var("SITE_URL").unwrap_or_else(|| "http://localhost:5173".to_string()).trim_end_matches('/').to_string(),
            server: ServerConfig {
                port,
                database_url: var("DATABASE_URL"),
                payment_secret_key: var("PAYMENT_SECRET_KEY"),
                payment_webhook_secret: var("PAYMENT_WEBHOOK_SECRET"),
                email,
                nats_url: var("NATS_URL"),
                admin_api_key: var("ADMIN_API_KEY"),
                currency: var("CURRENCY").unwrap_or_else(|| "usd".to_string()).to_lowercase(),
            },
        }
    }
}
