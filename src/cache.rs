//! Time-bounded memoization of expensive range queries.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use time::{Date, Duration, OffsetDateTime};

use crate::clock::{Clock, SystemClock};
use crate::types::{DateRange, DomainName};

/// Default lifetime of a cached response.
pub const DEFAULT_TTL: Duration = Duration::minutes(15);

/// Cache key for range queries: `(domain, start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeKey {
    pub domain: DomainName,
    pub start: Date,
    pub end: Date,
}

impl RangeKey {
    #[must_use]
    pub fn new(domain: &DomainName, range: DateRange) -> Self {
        Self {
            domain: domain.clone(),
            start: range.start(),
            end: range.end(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    captured_at: OffsetDateTime,
}

/// TTL cache with lookup-time staleness checks.
///
/// Stale entries are not purged; they are overwritten by the next miss.
/// There is no per-key lock, so concurrent misses on one key may each run
/// the computation. The last write wins.
pub struct ResponseCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key` if fresh, otherwise run `compute`
    /// and store its result. Errors are returned as-is and never cached.
    ///
    /// # Errors
    ///
    /// Propagates the error of `compute`.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            tracing::debug!("Response cache hit");
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Fresh value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .filter(|entry| now - entry.captured_at < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            captured_at: self.clock.now(),
        };
        self.lock().insert(key, entry);
    }

    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
