//! Bounded in-process stores for the sample gate and pending requests
//!
//! Userspace counterparts of the kernel's `COUNTS` and `PENDING` hash maps:
//! fixed capacity, no eviction, and a full store rejects new keys instead of
//! growing. Unlike the kernel maps they support an epoch reset.

use ljprof_common::{CapacityExhausted, CounterStore, PendingRequest, PendingStore};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

pub struct BoundedCounterStore<K> {
    capacity: usize,
    counters: Mutex<HashMap<K, u64>>,
}

impl<K: Eq + Hash + Clone> BoundedCounterStore<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Current count of `key` (0 when absent).
    pub fn count(&self, key: &K) -> u64 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    /// Forgets every key, so each context resolves again on its next hit.
    pub fn reset_epoch(&self) {
        self.lock().clear();
    }

    /// Copy of every (key, count) pair.
    pub fn snapshot(&self) -> Vec<(K, u64)> {
        self.lock()
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, u64>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Eq + Hash + Clone> CounterStore<K> for BoundedCounterStore<K> {
    fn fetch_increment(&self, key: &K) -> Result<u64, CapacityExhausted> {
        let mut counters = self.lock();
        if let Some(count) = counters.get_mut(key) {
            let prev = *count;
            *count += 1;
            return Ok(prev);
        }
        if counters.len() >= self.capacity {
            return Err(CapacityExhausted);
        }
        counters.insert(key.clone(), 1);
        Ok(0)
    }
}

pub struct BoundedPendingStore {
    capacity: usize,
    records: Mutex<HashMap<u32, PendingRequest>>,
}

impl BoundedPendingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, PendingRequest>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PendingStore for BoundedPendingStore {
    fn put(&self, tid: u32, request: &PendingRequest) -> Result<(), CapacityExhausted> {
        let mut records = self.lock();
        if !records.contains_key(&tid) && records.len() >= self.capacity {
            return Err(CapacityExhausted);
        }
        records.insert(tid, *request);
        Ok(())
    }

    fn get(&self, tid: u32) -> Option<PendingRequest> {
        self.lock().get(&tid).copied()
    }

    fn remove(&self, tid: u32) {
        self.lock().remove(&tid);
    }
}
