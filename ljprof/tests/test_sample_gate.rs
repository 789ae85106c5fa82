use ljprof::gate_store::{BoundedCounterStore, BoundedPendingStore};
use ljprof_common::{GateDecision, PendingRequest, PendingRequests, SampleGate};
use std::sync::{Arc, Barrier};

#[test]
fn test_concurrent_triggers_resolve_once() {
    const TRIGGERS: usize = 16;
    let gate = Arc::new(SampleGate::new(BoundedCounterStore::<u64>::new(64)));
    let barrier = Arc::new(Barrier::new(TRIGGERS));

    let handles: Vec<_> = (0..TRIGGERS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                gate.should_resolve(&0xfeed)
            })
        })
        .collect();

    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|&won| won).count();
    assert_eq!(winners, 1);
    assert_eq!(gate.store().count(&0xfeed), TRIGGERS as u64);
}

#[test]
fn test_full_store_drops_new_keys_only() {
    let gate = SampleGate::new(BoundedCounterStore::new(2));
    assert_eq!(gate.admit(&"a"), GateDecision::Resolve);
    assert_eq!(gate.admit(&"b"), GateDecision::Resolve);
    assert_eq!(gate.admit(&"c"), GateDecision::Dropped);
    // Known keys keep counting
    assert_eq!(gate.admit(&"a"), GateDecision::Skip);
    assert_eq!(gate.store().count(&"a"), 2);
    assert_eq!(gate.store().count(&"c"), 0);
}

#[test]
fn test_epoch_reset_rearms_gate() {
    let gate = SampleGate::new(BoundedCounterStore::new(8));
    assert!(gate.should_resolve(&1u32));
    assert!(!gate.should_resolve(&1u32));
    gate.store().reset_epoch();
    assert!(gate.should_resolve(&1u32));
}

#[test]
fn test_pending_requests_lifecycle() {
    let pending = PendingRequests::new(BoundedPendingStore::new(4));

    pending.enter(100, &PendingRequest::new(7, 0x7f00_0000_1000)).unwrap();
    assert_eq!(pending.lookup(100).map(|r| r.state), Some(0x7f00_0000_1000));
    assert!(pending.lookup(101).is_none());

    pending.exit(100);
    assert!(pending.lookup(100).is_none());

    // A null state is never recorded
    pending.enter(102, &PendingRequest::new(7, 0)).unwrap();
    assert!(pending.lookup(102).is_none());
}
