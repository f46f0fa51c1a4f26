//! Cart Aggregate

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{round_money, ProductId};

/// Largest quantity a single cart line can hold.
pub const MAX_LINE_QUANTITY: u32 = 99;

/// Largest unit price a product can carry into the cart.
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

fn checked_price(price: Decimal) -> Option<Decimal> {
    let price = round_money(price);
    (price > Decimal::ZERO && price <= MAX_UNIT_PRICE).then_some(price)
}

/// Catalog data captured when a product is added to the cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub badge: Option<String>,
}

impl ProductSnapshot {
    /// Validates the price and rounds it to cents.
    pub fn new(id: ProductId, name: impl Into<String>, price: Decimal) -> Result<Self, CartError> {
        Self { id, name: name.into(), tagline: String::new(), price, image: String::new(), badge: None }.validated()
    }

    /// Applies the price rules of [`Self::new`] to a snapshot decoded or built field by field.
    pub fn validated(mut self) -> Result<Self, CartError> {
        self.price = checked_price(self.price).ok_or(CartError::InvalidPrice)?;
        Ok(self)
    }

    pub fn with_tagline(mut self, tagline: impl Into<String>) -> Self { self.tagline = tagline.into(); self }
    pub fn with_image(mut self, image: impl Into<String>) -> Self { self.image = image.into(); self }
    pub fn with_badge(mut self, badge: impl Into<String>) -> Self { self.badge = Some(badge.into()); self }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub badge: Option<String>,
    pub quantity: u32,
}

impl CartItem {
    fn from_snapshot(product: ProductSnapshot) -> Self {
        let ProductSnapshot { id, name, tagline, price, image, badge } = product;
        Self { id, name, tagline, price, image, badge, quantity: 1 }
    }

    /// Saturates at `Decimal::MAX`; lines held by a [`Cart`] never get there.
    pub fn line_total(&self) -> Decimal { self.price.checked_mul(Decimal::from(self.quantity)).unwrap_or(Decimal::MAX) }
}

/// Line items keyed by product id; at most one entry per id, never a zero quantity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Rebuilds a cart from stored items, merging duplicate ids and dropping
    /// entries that could not have been produced by the cart itself.
    /// Prices are rounded to cents and quantities capped at [`MAX_LINE_QUANTITY`].
    pub fn from_items(items: Vec<CartItem>) -> Self {
        let mut cart = Self::new();
        for mut item in items {
            let Some(price) = checked_price(item.price) else { continue };
            if item.quantity == 0 { continue; }
            item.price = price;
            item.quantity = item.quantity.min(MAX_LINE_QUANTITY);
            match cart.items.iter_mut().find(|i| i.id == item.id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity).min(MAX_LINE_QUANTITY),
                None => cart.items.push(item),
            }
        }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn into_items(self) -> Vec<CartItem> { self.items }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, id: &ProductId) -> Option<&CartItem> { self.items.iter().find(|i| &i.id == id) }

    /// Increments an existing line or inserts a new one with quantity 1.
    ///
    /// # Errors
    /// - [`CartError::InvalidPrice`] when the price is not positive or exceeds [`MAX_UNIT_PRICE`].
    /// - [`CartError::QuantityLimit`] when the line already holds [`MAX_LINE_QUANTITY`].
    pub fn add(&mut self, product: ProductSnapshot) -> Result<&CartItem, CartError> {
        let product = product.validated()?;
        let idx = match self.items.iter().position(|i| i.id == product.id) {
            Some(idx) => {
                let item = &mut self.items[idx];
                if item.quantity >= MAX_LINE_QUANTITY { return Err(CartError::QuantityLimit); }
                item.quantity += 1;
                idx
            }
            None => {
                self.items.push(CartItem::from_snapshot(product));
                self.items.len() - 1
            }
        };
        Ok(&self.items[idx])
    }

    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &ProductId) { self.items.retain(|i| &i.id != id); }

    /// Absolute set, capped at [`MAX_LINE_QUANTITY`]. A quantity of zero or less removes the line.
    pub fn update_quantity(&mut self, id: &ProductId, quantity: i64) {
        if quantity <= 0 { return self.remove(id); }
        if let Some(item) = self.items.iter_mut().find(|i| &i.id == id) {
            item.quantity = u32::try_from(quantity).unwrap_or(u32::MAX).min(MAX_LINE_QUANTITY);
        }
    }

    pub fn clear(&mut self) { self.items.clear(); }

    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).fold(Decimal::ZERO, |acc, line| acc.checked_add(line).unwrap_or(Decimal::MAX))
    }

    pub fn count(&self) -> u64 { self.items.iter().map(|i| u64::from(i.quantity)).sum() }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("Please sign in to add items to your cart")]
    AuthenticationRequired,
    #[error("Another cart update is still in progress")]
    Busy,
    #[error("Product price must be greater than zero")]
    InvalidPrice,
    #[error("You can add up to 99 of each product")]
    QuantityLimit,
    #[error("Could not verify your session: {0}")]
    Session(String),
}
