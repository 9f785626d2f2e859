use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::CacheStore;

/// What the cache does with a failed computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Hand the failure to the caller and anyone already waiting on it, then
    /// forget it so the next lookup runs the computation again
    #[default]
    Retry,
    /// Keep the failure and replay it for every later lookup of the key
    Memoize,
}

/// A value returned by [`FingerprintCache::get_or_compute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: Arc<[u8]>,
    /// `false` only for the call that actually ran the computation
    pub cached: bool,
}

impl Lookup {
    /// Lossy UTF-8 view of `value`; invalid sequences become U+FFFD
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

enum SlotState<E> {
    Pending,
    Ready(Result<Arc<[u8]>, E>),
    /// The computing caller unwound before publishing
    Abandoned,
}

struct Slot<E> {
    state: Mutex<SlotState<E>>,
    ready: Condvar,
}

impl<E: Clone> Slot<E> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, state: SlotState<E>) {
        *lock(&self.state) = state;
        self.ready.notify_all();
    }

    /// Block until the slot is filled; `None` if its owner gave up
    fn wait(&self) -> Option<Result<Arc<[u8]>, E>> {
        let mut state = lock(&self.state);
        loop {
            match &*state {
                SlotState::Pending => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                SlotState::Ready(result) => return Some(result.clone()),
                SlotState::Abandoned => return None,
            }
        }
    }

    fn is_ready(&self) -> bool {
        matches!(&*lock(&self.state), SlotState::Ready(_))
    }
}

enum Claim<E> {
    Owner(Arc<Slot<E>>),
    Waiter(Arc<Slot<E>>),
}

/// Read-through memoization keyed by opaque strings
///
/// At most one computation runs per key at any time: the first caller for a
/// key computes, later callers block on the same slot and receive the
/// published result. The key map lock is only held to find or insert a slot,
/// so lookups of unrelated keys never wait on each other. Entries are never
/// evicted.
pub struct FingerprintCache<E> {
    slots: Mutex<FxHashMap<String, Arc<Slot<E>>>>,
    policy: FailurePolicy,
    store: Option<Arc<dyn CacheStore>>,
}

impl<E: Clone> FingerprintCache<E> {
    pub fn new() -> Self {
        Self::with_policy(FailurePolicy::default())
    }

    pub fn with_policy(policy: FailurePolicy) -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
            policy,
            store: None,
        }
    }

    /// Back the in-memory map with a durable store
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Return the value for `key`, running `compute` only if no value exists
    /// and no other caller is already computing it
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<Lookup, E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
    {
        let slot = loop {
            match self.claim(key) {
                Claim::Owner(slot) => break slot,
                Claim::Waiter(slot) => {
                    if let Some(result) = slot.wait() {
                        return result.map(|value| Lookup {
                            value,
                            cached: true,
                        });
                    }
                    debug!(key, "in-flight computation abandoned, retrying");
                }
            }
        };

        self.fill(key, &slot, compute)
    }

    /// Number of keys holding a published value
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.is_ready())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.slots)
            .get(key)
            .map(|slot| slot.is_ready())
            .unwrap_or(false)
    }

    fn claim(&self, key: &str) -> Claim<E> {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(key) {
            return Claim::Waiter(Arc::clone(slot));
        }

        let slot = Arc::new(Slot::pending());
        slots.insert(key.to_string(), Arc::clone(&slot));
        Claim::Owner(slot)
    }

    fn fill<F>(&self, key: &str, slot: &Arc<Slot<E>>, compute: F) -> Result<Lookup, E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
    {
        let pending = PendingSlot {
            cache: self,
            key,
            slot,
            published: false,
        };

        if let Some(value) = self.load_stored(key) {
            pending.publish(Ok(Arc::clone(&value)));
            return Ok(Lookup {
                value,
                cached: true,
            });
        }

        match compute() {
            Ok(bytes) => {
                let value: Arc<[u8]> = Arc::from(bytes);
                self.save_stored(key, &value);
                pending.publish(Ok(Arc::clone(&value)));
                Ok(Lookup {
                    value,
                    cached: false,
                })
            }
            Err(err) => {
                pending.publish(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn load_stored(&self, key: &str) -> Option<Arc<[u8]>> {
        let store = self.store.as_ref()?;
        match store.load(key) {
            Ok(Some(bytes)) => {
                debug!(key, "loaded from durable store");
                Some(Arc::from(bytes))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable store entry for {}: {}", key, e);
                None
            }
        }
    }

    fn save_stored(&self, key: &str, value: &[u8]) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(key, value) {
                warn!("Failed to persist store entry for {}: {}", key, e);
            }
        }
    }

    /// Drop `slot` from the map if it is still the one registered for `key`
    fn forget(&self, key: &str, slot: &Arc<Slot<E>>) {
        let mut slots = lock(&self.slots);
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
    }
}

impl<E: Clone> Default for FingerprintCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of an in-flight slot
///
/// Dropping it without publishing (a panicking computation) marks the slot
/// abandoned so waiters retry instead of blocking forever.
struct PendingSlot<'a, E: Clone> {
    cache: &'a FingerprintCache<E>,
    key: &'a str,
    slot: &'a Arc<Slot<E>>,
    published: bool,
}

impl<E: Clone> PendingSlot<'_, E> {
    fn publish(mut self, result: Result<Arc<[u8]>, E>) {
        if result.is_err() && self.cache.policy == FailurePolicy::Retry {
            self.cache.forget(self.key, self.slot);
        }
        self.slot.publish(SlotState::Ready(result));
        self.published = true;
    }
}

impl<E: Clone> Drop for PendingSlot<'_, E> {
    fn drop(&mut self) {
        if !self.published {
            self.cache.forget(self.key, self.slot);
            self.slot.publish(SlotState::Abandoned);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
