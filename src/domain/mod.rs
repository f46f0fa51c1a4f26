//! Storefront domain: cart, pricing and order records.
pub mod aggregates;
pub mod events;
pub mod pricing;
pub mod value_objects;
