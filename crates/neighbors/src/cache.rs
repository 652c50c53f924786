//! Key → value cache with per-entry TTL, LRU capacity and a failure counter.
//!
//! Expiry is lazy: an entry older than the TTL is dropped the next time it is
//! touched. Capacity eviction is independent of TTL. Each slot also carries a
//! retry counter that survives value eviction, so consecutive failures for a
//! key can be counted while no successful value is cached.
//!
//! Every stored value gets a fresh generation. The `*_if_current` operations
//! only touch a slot whose generation still matches, so work started before a
//! `clear` or a replacement cannot settle somebody else's entry.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    value: Option<V>,
    generation: u64,
    inserted_at: Instant,
    retry_count: u32,
}

impl<V> Slot<V> {
    fn stamp(generation: u64, now: Instant) -> Self {
        Self {
            value: None,
            generation,
            inserted_at: now,
            retry_count: 0,
        }
    }
}

pub struct ExpiringCache<V> {
    ttl: Duration,
    slots: Mutex<LruCache<String, Slot<V>>>,
    generations: AtomicU64,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            slots: Mutex::new(LruCache::new(capacity)),
            generations: AtomicU64::new(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut slots = self.lock();
        self.live_slot(&mut slots, key)?.value.clone()
    }

    /// Stores `value`, refreshing the timestamp and keeping the retry count.
    pub fn set(&self, key: &str, value: V) {
        let mut slots = self.lock();
        let generation = self.next_generation();
        self.store(&mut slots, key, generation, value);
    }

    /// Returns the live value for `key`, or stores the one built by `make`.
    ///
    /// The check and the insert happen under one lock, so concurrent callers
    /// for the same key converge on a single value. `make` receives the
    /// generation its value will be stored under. The flag reports whether
    /// `make` ran.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce(u64) -> V) -> (V, bool) {
        let mut slots = self.lock();
        if let Some(Slot {
            value: Some(value), ..
        }) = self.live_slot(&mut slots, key)
        {
            return (value.clone(), false);
        }
        let generation = self.next_generation();
        let value = make(generation);
        self.store(&mut slots, key, generation, value.clone());
        (value, true)
    }

    /// Counts one more failure for `key`.
    ///
    /// Creates a stamp with count 0 (and returns 0) when none exists,
    /// otherwise increments and returns the new count.
    pub fn bump_retry_count(&self, key: &str) -> u32 {
        let mut slots = self.lock();
        if let Some(slot) = self.live_slot(&mut slots, key) {
            slot.retry_count = slot.retry_count.saturating_add(1);
            return slot.retry_count;
        }
        let generation = self.next_generation();
        slots.put(key.to_string(), Slot::stamp(generation, Instant::now()));
        0
    }

    /// [`bump_retry_count`](Self::bump_retry_count) restricted to the slot
    /// stored under `generation`. `None` when that slot is gone.
    pub fn bump_retry_count_if_current(&self, key: &str, generation: u64) -> Option<u32> {
        let mut slots = self.lock();
        let slot = self.current_slot(&mut slots, key, generation)?;
        slot.retry_count = slot.retry_count.saturating_add(1);
        Some(slot.retry_count)
    }

    /// Replaces the value stored under `generation` with a new one.
    pub fn replace_if_current(&self, key: &str, generation: u64, value: V) -> bool {
        let mut slots = self.lock();
        if self.current_slot(&mut slots, key, generation).is_none() {
            return false;
        }
        let generation = self.next_generation();
        self.store(&mut slots, key, generation, value);
        true
    }

    pub fn evict_value_if_current(&self, key: &str, generation: u64) -> bool {
        let mut slots = self.lock();
        match self.current_slot(&mut slots, key, generation) {
            Some(slot) => {
                slot.value = None;
                true
            }
            None => false,
        }
    }

    pub fn delete_if_current(&self, key: &str, generation: u64) -> bool {
        let mut slots = self.lock();
        if self.current_slot(&mut slots, key, generation).is_none() {
            return false;
        }
        slots.pop(key).is_some()
    }

    pub fn retry_count(&self, key: &str) -> Option<u32> {
        let mut slots = self.lock();
        self.live_slot(&mut slots, key).map(|slot| slot.retry_count)
    }

    /// Drops the cached value but keeps the retry stamp.
    pub fn evict_value(&self, key: &str) {
        let mut slots = self.lock();
        if let Some(slot) = slots.peek_mut(key) {
            slot.value = None;
        }
    }

    /// Removes the slot entirely, retry count included.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of slots currently held, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn store(&self, slots: &mut LruCache<String, Slot<V>>, key: &str, generation: u64, value: V) {
        let retry_count = self
            .live_slot(slots, key)
            .map_or(0, |slot| slot.retry_count);
        slots.put(
            key.to_string(),
            Slot {
                value: Some(value),
                generation,
                inserted_at: Instant::now(),
                retry_count,
            },
        );
    }

    fn current_slot<'a>(
        &self,
        slots: &'a mut LruCache<String, Slot<V>>,
        key: &str,
        generation: u64,
    ) -> Option<&'a mut Slot<V>> {
        self.live_slot(slots, key)
            .filter(|slot| slot.generation == generation)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Slot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_slot<'a>(
        &self,
        slots: &'a mut LruCache<String, Slot<V>>,
        key: &str,
    ) -> Option<&'a mut Slot<V>> {
        let expired = slots
            .peek(key)
            .is_some_and(|slot| slot.inserted_at.elapsed() >= self.ttl);
        if expired {
            slots.pop(key);
            return None;
        }
        slots.get_mut(key)
    }
}
