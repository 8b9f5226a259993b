// Scope-keyed query cache with invalidation
// Slots are generation-stamped so a fetch that started before an invalidation
// can never overwrite the slot after it

use lru::LruCache;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::debug;

use crate::error::AppResult;

/// Scope used for the public feed and other unscoped collections.
pub const PUBLIC_SCOPE: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub family: &'static str,
    pub scope: String,
}

impl CacheKey {
    pub fn new(family: &'static str, scope: impl Into<String>) -> Self {
        Self {
            family,
            scope: scope.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.scope)
    }
}

/// Read contract handed to the view layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub error: Option<String>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            is_stale: true,
            error: None,
        }
    }
}

struct Slot<V> {
    value: Option<V>,
    stale: bool,
    generation: u64,
    in_flight: usize,
    error: Option<String>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self {
            value: None,
            stale: true,
            generation: 0,
            in_flight: 0,
            error: None,
        }
    }
}

pub struct QueryCache<V> {
    inner: Mutex<LruCache<CacheKey, Slot<V>>>,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut LruCache<CacheKey, Slot<V>>) -> R) -> R {
        // A poisoned lock only means another thread panicked mid-update; the slots are still usable
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// The cached value, if present and not invalidated.
    pub fn fresh(&self, key: &CacheKey) -> Option<V> {
        self.with_slots(|slots| {
            slots
                .get(key)
                .filter(|slot| !slot.stale)
                .and_then(|slot| slot.value.clone())
        })
    }

    /// The cached value even when stale.
    pub fn peek(&self, key: &CacheKey) -> Option<V> {
        self.with_slots(|slots| slots.peek(key).and_then(|slot| slot.value.clone()))
    }

    /// Register a fetch for `key` and return the generation it must complete against.
    pub fn begin_fetch(&self, key: &CacheKey) -> u64 {
        self.with_slots(|slots| {
            let slot = slots.get_or_insert_mut(key.clone(), Slot::empty);
            slot.in_flight += 1;
            slot.generation
        })
    }

    /// Record a fetch result. Returns false when the slot was invalidated or
    /// evicted while the fetch was running, in which case the result is dropped.
    pub fn complete_fetch(&self, key: &CacheKey, generation: u64, result: Result<V, String>) -> bool {
        self.with_slots(|slots| {
            let Some(slot) = slots.get_mut(key) else {
                return false;
            };
            slot.in_flight = slot.in_flight.saturating_sub(1);
            if slot.generation != generation {
                debug!("Discarding result for {} fetched before invalidation", key);
                return false;
            }
            match result {
                Ok(value) => {
                    slot.value = Some(value);
                    slot.stale = false;
                    slot.error = None;
                }
                Err(error) => slot.error = Some(error),
            }
            true
        })
    }

    /// Mark `key` stale. Returns whether a slot existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.with_slots(|slots| match slots.peek_mut(key) {
            Some(slot) => {
                slot.stale = true;
                slot.generation += 1;
                true
            }
            None => false,
        })
    }

    /// Mark every slot stale.
    pub fn invalidate_all(&self) -> usize {
        self.with_slots(|slots| {
            let mut count = 0;
            for (_, slot) in slots.iter_mut() {
                slot.stale = true;
                slot.generation += 1;
                count += 1;
            }
            count
        })
    }

    /// Patch the cached value in place, returning the patched copy.
    /// The slot's generation and freshness are left untouched.
    pub fn update<F>(&self, key: &CacheKey, patch: F) -> Option<V>
    where
        F: FnOnce(&mut V),
    {
        self.with_slots(|slots| {
            let value = slots.peek_mut(key)?.value.as_mut()?;
            patch(value);
            Some(value.clone())
        })
    }

    pub fn state(&self, key: &CacheKey) -> QueryState<V> {
        self.with_slots(|slots| match slots.peek(key) {
            Some(slot) => QueryState {
                data: slot.value.clone(),
                is_loading: slot.in_flight > 0 && slot.value.is_none(),
                is_fetching: slot.in_flight > 0,
                is_stale: slot.stale,
                error: slot.error.clone(),
            },
            None => QueryState::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.with_slots(|slots| slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve `key` from cache when fresh, otherwise run `fetch` and record its outcome.
    pub async fn read_through<F, Fut>(&self, key: &CacheKey, fetch: F) -> AppResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<V>>,
    {
        if let Some(value) = self.fresh(key) {
            debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let generation = self.begin_fetch(key);
        let result = fetch().await;
        let outcome = match &result {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(err.to_string()),
        };
        self.complete_fetch(key, generation, outcome);
        result
    }
}
