//! Shopper cart state with sign-in gating and durable persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::persistence::CartStorage;
use super::InFlight;
use crate::boundary::IdentityProvider;
use crate::domain::aggregates::{Cart, CartError, CartItem, ProductSnapshot};
use crate::domain::value_objects::ProductId;

pub struct CartStore {
    identity: Arc<dyn IdentityProvider>,
    storage: Arc<dyn CartStorage>,
    cart: Mutex<Cart>,
    open: AtomicBool,
    adding: AtomicBool,
}

impl CartStore {
    /// Restores saved items. Unreadable storage starts an empty cart rather than failing.
    pub fn load(identity: Arc<dyn IdentityProvider>, storage: Arc<dyn CartStorage>) -> Self {
        let items = storage.load().unwrap_or_else(|e| {
            warn!(error = %e, "could not restore cart, starting empty");
            Vec::new()
        });
        Self {
            identity,
            storage,
            cart: Mutex::new(Cart::from_items(items)),
            open: AtomicBool::new(false),
            adding: AtomicBool::new(false),
        }
    }

    fn cart(&self) -> MutexGuard<'_, Cart> { self.cart.lock().unwrap_or_else(PoisonError::into_inner) }

    fn persist(&self, cart: &Cart) {
        if let Err(e) = self.storage.save(cart.items()) {
            warn!(error = %e, "failed to persist cart");
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Cart) -> R) -> R {
        let mut cart = self.cart();
        let out = f(&mut cart);
        self.persist(&cart);
        out
    }

    /// Adds one unit of `product` when a user is signed in.
    ///
    /// # Errors
    /// - [`CartError::AuthenticationRequired`] when nobody is signed in; the cart is untouched.
    /// - [`CartError::Busy`] while a previous add is still checking the session.
    /// - [`CartError::Session`] when the identity provider could not be reached.
    /// - [`CartError::InvalidPrice`] or [`CartError::QuantityLimit`] from [`Cart::add`].
    pub async fn try_add_item(&self, product: ProductSnapshot) -> Result<CartItem, CartError> {
        let Some(_flight) = InFlight::try_begin(&self.adding) else {
            debug!(product = %product.id, "add already in flight");
            return Err(CartError::Busy);
        };
        let (id, price) = (product.id.clone(), product.price);
        let product = product.validated().map_err(|e| {
            warn!(product = %id, price = %price, "product refused by the cart");
            e
        })?;
        match self.identity.current_user().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(product = %product.id, "add to cart requires sign-in");
                return Err(CartError::AuthenticationRequired);
            }
            Err(e) => {
                warn!(error = %e, "session check failed during add to cart");
                return Err(CartError::Session(e.to_string()));
            }
        }
        let item = {
            let mut cart = self.cart();
            let item = cart.add(product)?.clone();
            self.persist(&cart);
            item
        };
        debug!(product = %item.id, quantity = item.quantity, "cart item added");
        Ok(item)
    }

    /// Boolean form of [`Self::try_add_item`]: `true` when the cart changed.
    pub async fn add_item(&self, product: ProductSnapshot) -> bool { self.try_add_item(product).await.is_ok() }

    pub fn remove_item(&self, id: &ProductId) { self.mutate(|cart| cart.remove(id)); }

    pub fn update_quantity(&self, id: &ProductId, quantity: i64) { self.mutate(|cart| cart.update_quantity(id, quantity)); }

    pub fn clear_cart(&self) {
        self.mutate(Cart::clear);
        info!("cart cleared");
    }

    pub fn toggle_cart(&self) -> bool { !self.open.fetch_xor(true, Ordering::AcqRel) }
    pub fn set_cart_open(&self, open: bool) { self.open.store(open, Ordering::Release); }
    pub fn is_open(&self) -> bool { self.open.load(Ordering::Acquire) }

    pub fn items(&self) -> Vec<CartItem> { self.cart().items().to_vec() }
    pub fn snapshot(&self) -> Cart { self.cart().clone() }
    pub fn is_empty(&self) -> bool { self.cart().is_empty() }
    pub fn total(&self) -> Decimal { self.cart().total() }
    pub fn count(&self) -> u64 { self.cart().count() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::persistence::MemoryStorage;
    use crate::test_support::{product, FakeIdentity};

    fn store(identity: &Arc<FakeIdentity>) -> (CartStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (CartStore::load(identity.clone(), storage.clone()), storage)
    }

    #[tokio::test]
    async fn signed_out_add_is_refused_without_mutation() {
        let identity = Arc::new(FakeIdentity::signed_out());
        let (cart, storage) = store(&identity);
        assert!(!cart.add_item(product("1", 2400)).await);
        assert_eq!(cart.try_add_item(product("1", 2400)).await, Err(CartError::AuthenticationRequired));
        assert!(cart.items().is_empty());
        assert!(storage.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_add_increments_and_persists() {
        let identity = Arc::new(FakeIdentity::signed_in());
        let (cart, storage) = store(&identity);
        assert!(cart.add_item(product("1", 2400)).await);
        assert!(cart.add_item(product("1", 2400)).await);
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.count(), 2);
        assert_eq!(cart.total(), Decimal::new(4800, 2));
        assert_eq!(storage.load().unwrap()[0].quantity, 2);
    }

    #[tokio::test]
    async fn session_failure_is_not_an_add() {
        let identity = Arc::new(FakeIdentity::unreachable());
        let (cart, _) = store(&identity);
        assert!(matches!(cart.try_add_item(product("1", 100)).await, Err(CartError::Session(_))));
        assert_eq!(cart.count(), 0);
    }

    #[tokio::test]
    async fn concurrent_add_is_single_flight() {
        let identity = Arc::new(FakeIdentity::signed_in().gated());
        let (cart, _) = store(&identity);
        let (first, second) = tokio::join!(cart.try_add_item(product("1", 100)), async {
            let second = cart.try_add_item(product("1", 100)).await;
            identity.release();
            second
        });
        assert!(first.is_ok());
        assert_eq!(second, Err(CartError::Busy));
        assert_eq!(cart.count(), 1);
    }

    #[tokio::test]
    async fn restored_cart_keeps_items_but_not_open_state() {
        let identity = Arc::new(FakeIdentity::signed_in());
        let storage = Arc::new(MemoryStorage::new());
        let first = CartStore::load(identity.clone(), storage.clone());
        first.add_item(product("a", 1000)).await;
        first.set_cart_open(true);

        let reopened = CartStore::load(identity, storage);
        assert_eq!(reopened.count(), 1);
        assert!(!reopened.is_open());
    }

    #[tokio::test]
    async fn update_remove_and_clear() {
        let identity = Arc::new(FakeIdentity::signed_in());
        let (cart, storage) = store(&identity);
        cart.add_item(product("a", 1000)).await;
        cart.add_item(product("b", 550)).await;
        cart.update_quantity(&ProductId::new("a").unwrap(), 3);
        assert_eq!(cart.total(), Decimal::new(3550, 2));
        cart.update_quantity(&ProductId::new("b").unwrap(), 0);
        assert!(cart.items().iter().all(|i| i.id.as_str() != "b"));
        cart.remove_item(&ProductId::new("nope").unwrap());
        cart.clear_cart();
        assert_eq!(cart.total(), Decimal::ZERO);
        assert_eq!(cart.count(), 0);
        assert!(storage.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_rows_with_bad_prices_are_refused() {
        let identity = Arc::new(FakeIdentity::signed_in());
        let (cart, storage) = store(&identity);
        let negative: ProductSnapshot = serde_json::from_value(serde_json::json!({"id": 9, "name": "Mask", "price": -5})).unwrap();
        assert!(!cart.add_item(negative).await);
        assert_eq!((cart.count(), cart.total()), (0, Decimal::ZERO));
        assert!(storage.load().unwrap().is_empty());

        let odd: ProductSnapshot = serde_json::from_value(serde_json::json!({"id": 9, "name": "Mask", "price": 0.335})).unwrap();
        for _ in 0..3 {
            assert!(cart.add_item(odd.clone()).await);
        }
        assert_eq!(cart.total(), Decimal::new(102, 2));
        assert_eq!(storage.load().unwrap()[0].price, Decimal::new(34, 2));
    }

    #[tokio::test]
    async fn oversized_quantity_is_capped() {
        let (cart, _) = store(&Arc::new(FakeIdentity::signed_in()));
        assert!(cart.add_item(product("a", 1000)).await);
        cart.update_quantity(&ProductId::new("a").unwrap(), i64::MAX);
        assert_eq!(cart.count(), u64::from(crate::domain::aggregates::MAX_LINE_QUANTITY));
        assert_eq!(cart.total(), Decimal::new(99_000, 2));
    }

    #[test]
    fn toggle_flips_visibility() {
        let (cart, _) = store(&Arc::new(FakeIdentity::signed_in()));
        assert!(cart.toggle_cart());
        assert!(cart.is_open());
        assert!(!cart.toggle_cart());
        cart.set_cart_open(true);
        assert!(cart.is_open());
    }
}
