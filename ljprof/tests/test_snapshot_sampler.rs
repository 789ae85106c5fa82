mod common;

use common::{LuaImage, L, STACK};
use ljprof::profiling::SnapshotSampler;
use ljprof_common::{GateDecision, MemoryReader};
use std::time::Duration;

fn two_frame_image() -> LuaImage {
    let mut image = LuaImage::new();
    let handler = image.lua_function(b"@/srv/handler.lua", 10);
    let helper = image.lua_function(b"@/srv/helper.lua", 3);
    image.push_lua(handler, 0);
    image.push_lua(helper, 1);
    image.finish();
    image
}

#[test]
fn test_repeated_reads_resolve_once() {
    let image = two_frame_image();
    let layout = image.layout;
    let mut sampler = SnapshotSampler::new(image.mem, layout, L, 16, 8).with_process(9, "nginx");

    assert_eq!(sampler.sample_once().unwrap(), Some(GateDecision::Resolve));
    assert_eq!(sampler.sample_once().unwrap(), Some(GateDecision::Skip));
    sampler.run(3, Duration::ZERO).unwrap();

    assert_eq!(sampler.stats.reads, 5);
    assert_eq!(sampler.stats.resolved, 1);
    let records = sampler.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].count, 5);
    assert_eq!(records[0].comm, "nginx");
    assert_eq!(records[0].lua, vec!["/srv/handler.lua:10", "/srv/helper.lua:3"]);
}

#[test]
fn test_thread_outside_lua_counts_as_empty() {
    let mut image = LuaImage::new();
    image.finish();
    let layout = image.layout;
    let mut sampler = SnapshotSampler::new(image.mem, layout, L, 16, 8);

    assert_eq!(sampler.sample_once().unwrap(), None);
    assert_eq!(sampler.stats.empty, 1);
    assert!(sampler.records().is_empty());
}

#[test]
fn test_unreadable_state_fails_the_run() {
    let image = two_frame_image();
    let layout = image.layout;
    let mut sampler = SnapshotSampler::new(image.mem, layout, STACK + 0x50_0000, 16, 8);

    assert!(sampler.run(2, Duration::ZERO).is_err());
    assert_eq!(sampler.stats.unreadable, 2);
}

#[test]
fn test_image_state_reads_back() {
    let image = two_frame_image();
    let stack = image.mem.read_u64(L + u64::from(image.layout.state_stack)).unwrap();
    assert_eq!(stack, STACK);
}
