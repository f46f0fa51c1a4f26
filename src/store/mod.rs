//! Application-state containers. Each is an explicit instance handed to whoever needs
//! it, so tests build isolated stores.

pub mod cart;
pub mod discount;
pub mod persistence;

pub use cart::CartStore;
pub use discount::{DiscountError, DiscountValidator};
pub use persistence::{CartStorage, JsonFileStorage, MemoryStorage, StorageError};

use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flight marker for an operation. Held for the duration of the call, released on drop.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    pub(crate) fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}
