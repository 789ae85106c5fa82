//! Admission gates shared by the kernel program and userspace.
//!
//! [`SampleGate`] decides whether a sample context has been seen before, so
//! that the expensive Lua walk runs once per distinct context.
//! [`PendingRequests`] remembers which `lua_State` each thread is running.
//! Both are thin policies over injected stores: BPF hash maps in the kernel,
//! bounded in-process maps in userspace.

/// The backing store has no room for another key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityExhausted;

/// Bounded map of per-key counters.
pub trait CounterStore<K> {
    /// Atomically inserts `key` at zero when absent and increments it.
    /// Returns the value before the increment.
    ///
    /// # Errors
    /// Returns [`CapacityExhausted`] when `key` is absent and the store is
    /// full.
    fn fetch_increment(&self, key: &K) -> Result<u64, CapacityExhausted>;
}

/// Outcome of offering a sample to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// First trigger for this context; resolve it.
    Resolve,
    /// Context already resolved; only counted.
    Skip,
    /// Store full; the sample is dropped.
    Dropped,
}

/// First-seen-wins gate.
pub struct SampleGate<S> {
    store: S,
}

impl<S> SampleGate<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Counts one trigger for `key` and returns the previous count.
    ///
    /// # Errors
    /// Returns [`CapacityExhausted`] when the key cannot be stored.
    pub fn mark_seen<K>(&self, key: &K) -> Result<u64, CapacityExhausted>
    where
        S: CounterStore<K>,
    {
        self.store.fetch_increment(key)
    }

    /// Counts one trigger for `key` and classifies it.
    pub fn admit<K>(&self, key: &K) -> GateDecision
    where
        S: CounterStore<K>,
    {
        match self.mark_seen(key) {
            Ok(0) => GateDecision::Resolve,
            Ok(_) => GateDecision::Skip,
            Err(CapacityExhausted) => GateDecision::Dropped,
        }
    }

    /// Counts one trigger for `key`; true only for the first one since the
    /// store last forgot `key`.
    pub fn should_resolve<K>(&self, key: &K) -> bool
    where
        S: CounterStore<K>,
    {
        self.admit(key) == GateDecision::Resolve
    }
}

/// Interpreter state a thread entered, recorded by the entry probe.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingRequest {
    pub pid: u32,
    pub _padding: u32,
    /// Address of the running `lua_State`
    pub state: u64,
}

impl PendingRequest {
    #[must_use]
    pub const fn new(pid: u32, state: u64) -> Self {
        Self {
            pid,
            _padding: 0,
            state,
        }
    }
}

/// Bounded per-thread record store.
pub trait PendingStore {
    /// # Errors
    /// Returns [`CapacityExhausted`] when `tid` is new and the store is full.
    fn put(&self, tid: u32, request: &PendingRequest) -> Result<(), CapacityExhausted>;
    fn get(&self, tid: u32) -> Option<PendingRequest>;
    fn remove(&self, tid: u32);
}

/// Tracks the `lua_State` each thread is currently executing.
pub struct PendingRequests<S> {
    store: S,
}

impl<S: PendingStore> PendingRequests<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Records `request` for `tid`. Null states are ignored.
    ///
    /// # Errors
    /// Returns [`CapacityExhausted`] when the store is full.
    pub fn enter(&self, tid: u32, request: &PendingRequest) -> Result<(), CapacityExhausted> {
        if request.state == 0 {
            return Ok(());
        }
        self.store.put(tid, request)
    }

    pub fn exit(&self, tid: u32) {
        self.store.remove(tid);
    }

    /// The live record for `tid`, if any.
    pub fn lookup(&self, tid: u32) -> Option<PendingRequest> {
        self.store.get(tid).filter(|request| request.state != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    struct Counters {
        capacity: usize,
        map: RefCell<BTreeMap<u32, u64>>,
    }

    impl CounterStore<u32> for Counters {
        fn fetch_increment(&self, key: &u32) -> Result<u64, CapacityExhausted> {
            let mut map = self.map.borrow_mut();
            if !map.contains_key(key) && map.len() >= self.capacity {
                return Err(CapacityExhausted);
            }
            let value = map.entry(*key).or_insert(0);
            let prev = *value;
            *value += 1;
            Ok(prev)
        }
    }

    struct Slots(RefCell<BTreeMap<u32, PendingRequest>>);

    impl PendingStore for Slots {
        fn put(&self, tid: u32, request: &PendingRequest) -> Result<(), CapacityExhausted> {
            self.0.borrow_mut().insert(tid, *request);
            Ok(())
        }

        fn get(&self, tid: u32) -> Option<PendingRequest> {
            self.0.borrow().get(&tid).copied()
        }

        fn remove(&self, tid: u32) {
            self.0.borrow_mut().remove(&tid);
        }
    }

    #[test]
    fn test_first_trigger_wins() {
        let gate = SampleGate::new(Counters {
            capacity: 8,
            map: RefCell::default(),
        });
        assert!(gate.should_resolve(&7));
        assert!(!gate.should_resolve(&7));
        assert_eq!(gate.admit(&8), GateDecision::Resolve);
        assert_eq!(gate.mark_seen(&7), Ok(2));
    }

    #[test]
    fn test_full_store_drops() {
        let gate = SampleGate::new(Counters {
            capacity: 1,
            map: RefCell::default(),
        });
        assert_eq!(gate.admit(&1), GateDecision::Resolve);
        assert_eq!(gate.admit(&2), GateDecision::Dropped);
        assert_eq!(gate.admit(&1), GateDecision::Skip);
    }

    #[test]
    fn test_pending_lifecycle() {
        let pending = PendingRequests::new(Slots(RefCell::default()));
        pending.enter(10, &PendingRequest::new(1, 0)).unwrap();
        assert_eq!(pending.lookup(10), None);

        pending.enter(10, &PendingRequest::new(1, 0xdead_0000)).unwrap();
        assert_eq!(pending.lookup(10).map(|r| r.state), Some(0xdead_0000));

        pending.exit(10);
        assert_eq!(pending.lookup(10), None);
    }
}
