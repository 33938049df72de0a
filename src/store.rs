//! In-memory key-value store shared by every connection
//!
//! A single `RwLock` guards the whole map, so each operation is atomic.
//! Nothing orders operations issued by different connections.

use crate::config::StoreConfig;
use crate::error::{Result, UdsVaultError};
use crate::protocol::truncate_str;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// What a successful `set` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Inserted,
    Updated,
}

/// Trait defining the interface for key-value storage operations
#[allow(async_fn_in_trait)]
pub trait Store: Send + Sync {
    /// Set a key-value pair, failing with `StoreFull` for a new key once
    /// capacity is reached
    async fn set(&self, key: String, value: String) -> Result<SetOutcome>;

    /// Get a value by key
    async fn get(&self, key: &str) -> Option<String>;

    /// Get the number of stored items
    async fn len(&self) -> usize;
}

/// Bounded in-memory key-value store
#[derive(Debug)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
    config: StoreConfig,
}

impl MemoryStore {
    /// Create a store with the default bounds
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            data: RwLock::new(HashMap::with_capacity(config.capacity)),
            config,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }
}

fn bounded(mut s: String, max: usize) -> String {
    let end = truncate_str(&s, max).len();
    s.truncate(end);
    s
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn set(&self, key: String, value: String) -> Result<SetOutcome> {
        let key = bounded(key, self.config.max_key_len);
        let value = bounded(value, self.config.max_value_len);

        let mut data = self.data.write().await;
        if let Some(slot) = data.get_mut(&key) {
            *slot = value;
            return Ok(SetOutcome::Updated);
        }
        if data.len() >= self.config.capacity {
            return Err(UdsVaultError::StoreFull {
                capacity: self.config.capacity,
            });
        }
        data.insert(key, value);
        Ok(SetOutcome::Inserted)
    }

    async fn get(&self, key: &str) -> Option<String> {
        let key = truncate_str(key, self.config.max_key_len);
        let data = self.data.read().await;
        data.get(key).cloned()
    }

    async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}
