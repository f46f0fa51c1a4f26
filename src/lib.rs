//! Glow Storefront
//!
//! Core of a direct-to-consumer skincare store, plus the payment boundary service.
//!
//! ## Features
//! - Shopping cart with sign-in gating and durable storage
//! - Discount codes validated by the backend, applied locally
//! - Checkout totals (discount, 8% tax) and hosted payment handoff
//! - Order confirmation and tracking pages
//! - Checkout-session creation and payment webhook handling (`server`)

pub mod boundary;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod notice;
pub mod orders;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

use thiserror::Error;

use crate::boundary::BoundaryError;
use crate::checkout::CheckoutError;
use crate::domain::aggregates::{CartError, OrderError};
use crate::notice::Notice;
use crate::store::{DiscountError, StorageError};

pub use crate::checkout::{CheckoutOrchestrator, CheckoutStep, ReturnOutcome, ShippingDetails};
pub use crate::domain::pricing::{DiscountDecision, OrderTotals, TAX_RATE};
pub use crate::store::{CartStore, DiscountValidator};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StorefrontError {
    /// What the shopper sees for this failure.
    pub fn notice(&self) -> Notice {
        match self {
            Self::Cart(CartError::AuthenticationRequired) | Self::Discount(DiscountError::AuthenticationRequired) => {
                Notice::sign_in(self.to_string())
            }
            Self::Cart(CartError::InvalidPrice | CartError::QuantityLimit)
            | Self::Discount(DiscountError::EmptyCode)
            | Self::Checkout(CheckoutError::EmptyCart | CheckoutError::ShippingIncomplete) => Notice::validation(self.to_string()),
            Self::Discount(DiscountError::Rejected(reason)) => Notice::rejected(reason.clone()),
            Self::Boundary(BoundaryError::Rejected { status: 404, .. }) => Notice::not_found("We couldn't find that order"),
            Self::Boundary(BoundaryError::Rejected { message, .. }) => Notice::rejected(message.clone()),
            Self::Checkout(CheckoutError::Abandoned) => Notice::info(self.to_string()),
            _ => Notice::transport(self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
