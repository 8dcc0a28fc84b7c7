//! In-memory `TokenStore`.
//!
//! Expiry is lazy: an entry past its deadline is dropped on the next read.
//! Deadlines use `tokio::time::Instant`, so tests running with a paused clock
//! can move TTLs forward with `tokio::time::advance`.
//!
//! Also carries a few knobs tests need: operation counters, an outage switch,
//! per-prefix write failures and artificial latency.

use super::{CacheError, TokenStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    failing_write_prefix: Mutex<Option<String>>,
}

/// TTL-enforcing in-memory store. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    inner: Arc<Inner>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls so far.
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Number of `set_ex` calls so far (including skipped zero-TTL writes).
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// When set, every operation fails with `CacheError::Store`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock().await = latency;
    }

    /// Fail `set_ex` for keys starting with `prefix`; `None` clears it.
    ///
    /// Other keys keep working, so a two-record save can fail halfway.
    pub async fn fail_writes_matching(&self, prefix: Option<&str>) {
        *self.inner.failing_write_prefix.lock().await = prefix.map(str::to_string);
    }

    /// Keys currently live (not expired), sorted.
    pub async fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.inner.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn before_operation(&self) -> Result<(), CacheError> {
        let latency = *self.inner.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Store("in-memory store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        self.before_operation().await?;

        let mut entries = self.inner.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.before_operation().await?;

        let refused = self
            .inner
            .failing_write_prefix
            .lock()
            .await
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if refused {
            return Err(CacheError::Store(format!("in-memory write refused for {key}")));
        }

        let mut entries = self.inner.entries.lock().await;
        if ttl_seconds == 0 {
            entries.remove(key);
            return Ok(());
        }

        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(ttl_seconds))
            .ok_or_else(|| CacheError::Store(format!("ttl of {ttl_seconds}s is out of range")))?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.before_operation().await
    }
}
