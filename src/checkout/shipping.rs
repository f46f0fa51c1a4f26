//! Shipping details form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::boundary::User;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingDetails {
    #[validate(length(min = 1, max = 50, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50, message = "Last name is required"))]
    pub last_name: String,
    #[validate(email(message = "Please enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 7, max = 20, message = "Please enter a valid phone number"))]
    pub phone: String,
    #[validate(length(min = 1, max = 200, message = "Street address is required"))]
    pub address: String,
    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 100, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 3, max = 12, message = "Please enter a valid postal code"))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 56, message = "Country is required"))]
    pub country: String,
}

/// First message per failing field, keyed by field name.
pub type FieldErrors = BTreeMap<String, String>;

impl ShippingDetails {
    /// Form defaults for a signed-in shopper.
    pub fn prefilled(user: &User) -> Self {
        Self {
            first_name: user.first_name.clone().unwrap_or_default(),
            last_name: user.last_name.clone().unwrap_or_default(),
            email: user.email.clone().unwrap_or_default(),
            country: "United States".to_string(),
            ..Self::default()
        }
    }

    pub fn trimmed(&self) -> Self {
        let t = |s: &String| s.trim().to_string();
        Self {
            first_name: t(&self.first_name),
            last_name: t(&self.last_name),
            email: t(&self.email),
            phone: t(&self.phone),
            address: t(&self.address),
            city: t(&self.city),
            state: t(&self.state),
            postal_code: t(&self.postal_code),
            country: t(&self.country),
        }
    }

    /// Trims every field and validates the result.
    pub fn check(&self) -> Result<Self, FieldErrors> {
        let trimmed = self.trimmed();
        trimmed.validate().map_err(|e| field_errors(&e))?;
        Ok(trimmed)
    }

    pub fn full_name(&self) -> String { format!("{} {}", self.first_name, self.last_name).trim().to_string() }
}

fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .into_iter()
        .filter_map(|(field, errs)| {
            let first = errs.first()?;
            let message = first.message.as_ref().map_or_else(|| first.code.to_string(), |m| m.to_string());
            Some((field.to_string(), message))
        })
        .collect()
}
