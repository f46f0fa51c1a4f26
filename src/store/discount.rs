//! Applied discount code state.
//!
//! The remote procedure owns every eligibility rule (minimum order, expiry, usage caps,
//! per-user limits). This store only forwards the code, keeps at most one accepted
//! decision and applies it arithmetically.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::boundary::{DiscountAuthority, DiscountRequest, IdentityProvider};
use crate::domain::pricing::{calculate_discounted_total, DiscountDecision, DiscountedTotal};

const GENERIC_REJECTION: &str = "Invalid discount code";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscountError {
    #[error("Please enter a discount code")]
    EmptyCode,
    #[error("Please sign in to use discount codes")]
    AuthenticationRequired,
    #[error("A discount code is already being checked")]
    InFlight,
    /// Reason supplied by the validation procedure, passed through unchanged.
    #[error("{0}")]
    Rejected(String),
    #[error("Failed to validate discount code")]
    ValidationFailed,
}

/// Codes are compared case-insensitively by the backend; send them trimmed and uppercased.
pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

pub struct DiscountValidator {
    authority: Arc<dyn DiscountAuthority>,
    identity: Arc<dyn IdentityProvider>,
    applied: Mutex<Option<DiscountDecision>>,
    /// Held for the whole of a validation call; checkout waits on it before reading totals.
    gate: AsyncMutex<()>,
}

impl DiscountValidator {
    pub fn new(authority: Arc<dyn DiscountAuthority>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { authority, identity, applied: Mutex::new(None), gate: AsyncMutex::new(()) }
    }

    fn slot(&self) -> MutexGuard<'_, Option<DiscountDecision>> { self.applied.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Asks the remote authority about `code` for an order of `order_total`.
    ///
    /// A successful call replaces any previously applied decision. Rejections and transport
    /// failures leave no discount applied.
    pub async fn validate_code(&self, code: &str, order_total: Decimal) -> Result<DiscountDecision, DiscountError> {
        let code = normalize_code(code);
        if code.is_empty() { return Err(DiscountError::EmptyCode); }

        let _gate = self.gate.try_lock().map_err(|_| DiscountError::InFlight)?;

        let user = match self.identity.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(DiscountError::AuthenticationRequired),
            Err(e) => {
                warn!(error = %e, "session check failed before discount validation");
                return Err(DiscountError::ValidationFailed);
            }
        };

        let request = DiscountRequest { code: code.clone(), order_total, user_id: user.id };
        let decision = match self.authority.validate(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(code = %code, error = %e, "discount validation call failed");
                *self.slot() = None;
                return Err(DiscountError::ValidationFailed);
            }
        };

        if decision.valid {
            info!(code = %code, kind = ?decision.discount_type, value = %decision.discount_value, "discount applied");
            *self.slot() = Some(decision.clone());
            Ok(decision)
        } else {
            info!(code = %code, reason = ?decision.error, "discount rejected");
            *self.slot() = None;
            Err(DiscountError::Rejected(decision.error.unwrap_or_else(|| GENERIC_REJECTION.to_string())))
        }
    }

    pub fn remove_discount(&self) { *self.slot() = None; }

    pub fn applied(&self) -> Option<DiscountDecision> { self.slot().clone() }

    pub fn is_validating(&self) -> bool { self.gate.try_lock().is_err() }

    /// Applied decision once any in-flight validation has finished.
    pub async fn settled(&self) -> Option<DiscountDecision> {
        let _gate = self.gate.lock().await;
        self.applied()
    }

    pub fn calculate_discounted_total(&self, subtotal: Decimal) -> DiscountedTotal {
        calculate_discounted_total(subtotal, self.slot().as_ref())
    }
}
