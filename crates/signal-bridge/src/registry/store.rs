//! Insertion-ordered, append-only index of shared entities.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
struct Inner<T: ?Sized> {
    order: Vec<String>,
    entries: HashMap<String, Arc<T>>,
}

/// String-keyed index that remembers insertion order.
///
/// Entries are never removed. Inserting an existing key keeps the original
/// entry, so the first instance registered for a key is the one everybody
/// shares.
#[derive(Debug)]
pub struct IndexedStore<T: ?Sized> {
    inner: RwLock<Inner<T>>,
}

impl<T: ?Sized> Default for IndexedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> IndexedStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                order: Vec::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Insert `value` under `key` unless the key is already taken.
    ///
    /// Returns the entry now stored under `key`.
    pub async fn insert(&self, key: impl Into<String>, value: Arc<T>) -> Arc<T> {
        let key = key.into();
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.entries.get(&key) {
            return Arc::clone(existing);
        }
        inner.order.push(key.clone());
        inner.entries.insert(key, Arc::clone(&value));
        value
    }

    pub async fn get(&self, key: &str) -> Option<Arc<T>> {
        self.inner.read().await.entries.get(key).cloned()
    }

    /// Snapshot of all values in insertion order.
    ///
    /// Later inserts are not reflected in the returned vector.
    pub async fn values(&self) -> Vec<Arc<T>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|key| inner.entries.get(key).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
