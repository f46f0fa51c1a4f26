//! Durable storage for cart line items.
//!
//! Only the items are stored; whether the cart drawer is open is session state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::CartItem;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cart storage io: {0}")]
    Io(#[from] io::Error),
    #[error("cart storage format: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unsupported cart storage version {0}")]
    Version(u32),
}

pub trait CartStorage: Send + Sync {
    /// Stored items, empty when nothing has been saved yet.
    fn load(&self) -> Result<Vec<CartItem>, StorageError>;
    fn save(&self, items: &[CartItem]) -> Result<(), StorageError>;
}

#[derive(Serialize, Deserialize)]
struct PersistedCart {
    version: u32,
    items: Vec<CartItem>,
}

/// JSON document on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
    pub fn path(&self) -> &Path { &self.path }
}

impl CartStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<CartItem>, StorageError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let doc: PersistedCart = serde_json::from_slice(&raw)?;
        if doc.version != FORMAT_VERSION { return Err(StorageError::Version(doc.version)); }
        Ok(doc.items)
    }

    fn save(&self, items: &[CartItem]) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let doc = PersistedCart { version: FORMAT_VERSION, items: items.to_vec() };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&doc)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Process-local storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<Vec<CartItem>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }
    pub fn with_items(items: Vec<CartItem>) -> Self { Self { items: Mutex::new(items) } }
}

impl CartStorage for MemoryStorage {
    fn load(&self) -> Result<Vec<CartItem>, StorageError> {
        Ok(self.items.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, items: &[CartItem]) -> Result<(), StorageError> {
        *self.items.lock().unwrap_or_else(PoisonError::into_inner) = items.to_vec();
        Ok(())
    }
}
