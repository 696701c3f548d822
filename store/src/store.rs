use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    time::{self, Instant},
};

#[derive(Debug)]
struct Entry {
    value: Arc<[u8]>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    changed: Notify,
}

/// The in-memory key-value map behind a store server.
///
/// Cloning is cheap, every clone refers to the same entries. An expired entry
/// behaves exactly like a missing one until it's overwritten or purged.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Creates a new empty `Store`.
    ///
    /// # Returns
    /// A new `Store` instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, overwriting any previous value, and wakes every waiter.
    ///
    /// # Arguments
    /// * `key` - The key to set.
    /// * `value` - The opaque value.
    /// * `ttl` - How long the entry lives, `None` keeps it until the store is dropped.
    pub fn set<K, V>(&self, key: K, value: V, ttl: Option<Duration>)
    where
        K: Into<String>,
        V: Into<Arc<[u8]>>,
    {
        let entry = Entry {
            value: value.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        self.inner.entries.lock().insert(key.into(), entry);
        self.inner.changed.notify_waiters();
    }

    /// Returns the value under `key` if it's present and not expired.
    pub fn try_get(&self, key: &str) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();

        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Waits until `key` is present.
    ///
    /// # Arguments
    /// * `key` - The key to wait for.
    /// * `timeout` - An upper bound for the wait, `None` waits forever.
    ///
    /// # Returns
    /// The value, or `None` if `timeout` elapsed first.
    pub async fn wait(&self, key: &str, timeout: Option<Duration>) -> Option<Arc<[u8]>> {
        let wait = self.wait_forever(key);

        match timeout {
            Some(timeout) => time::timeout(timeout, wait).await.ok(),
            None => Some(wait.await),
        }
    }

    async fn wait_forever(&self, key: &str) -> Arc<[u8]> {
        loop {
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);

            // Register interest before looking, a `set` in between must not be missed.
            changed.as_mut().enable();

            if let Some(value) = self.try_get(key) {
                return value;
            }

            changed.await;
        }
    }

    /// Returns whether `key` is present and not expired.
    pub fn check(&self, key: &str) -> bool {
        self.try_get(key).is_some()
    }

    /// Removes `key`.
    ///
    /// # Returns
    /// Whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Drops every expired entry.
    ///
    /// # Returns
    /// The amount of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Returns the live keys starting with `prefix`, sorted.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();

        let mut keys: Vec<_> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();

        keys.sort();
        keys
    }

    /// Returns the amount of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
