//! Aggregates module
pub mod order;
pub mod cart;

pub use order::{status_display, Order, OrderError, OrderItem, OrderStatus, PaymentStatus, StatusDisplay, TrackingEvent};
pub use cart::{Cart, CartError, CartItem, ProductSnapshot, MAX_LINE_QUANTITY, MAX_UNIT_PRICE};
