//! Joins kernel sample counts with native and Lua stacks.

use anyhow::{Context, Result};
use aya::maps::{HashMap, MapData, StackTraceMap};
use aya::Ebpf;
use ljprof_common::SampleKey;
use log::{info, warn};
use std::borrow::Borrow;

use super::event_display::backtrace_labels;
use super::stack_resolver::StackResolver;
use crate::aggregator::StackAggregator;
use crate::domain::{ProfilerError, StackId};
use crate::export::SampleRecord;

/// Record for one `COUNTS` entry. The Lua backtrace is looked up by the
/// key's user stack id.
#[must_use]
pub fn sample_record(
    key: &SampleKey,
    count: u64,
    native: Vec<String>,
    kernel: Vec<String>,
    aggregator: &StackAggregator,
) -> SampleRecord {
    let lua = aggregator
        .get(StackId(key.user_stack_id))
        .map(|backtrace| backtrace_labels(&backtrace))
        .unwrap_or_default();
    SampleRecord {
        comm: String::from_utf8_lossy(key.comm()).into_owned(),
        pid: key.pid,
        count,
        native,
        lua,
        kernel,
    }
}

/// Records for every sampled stack in `COUNTS`.
///
/// # Errors
/// Returns an error if `COUNTS` or `STACK_TRACES` is missing
pub fn collect_samples(
    bpf: &Ebpf,
    aggregator: &StackAggregator,
    resolver: &StackResolver<'_>,
) -> Result<Vec<SampleRecord>> {
    let counts: HashMap<_, SampleKey, u64> =
        HashMap::try_from(bpf.map("COUNTS").ok_or(ProfilerError::MapNotFound("COUNTS"))?)?;
    let stack_traces =
        StackTraceMap::try_from(bpf.map("STACK_TRACES").ok_or(ProfilerError::MapNotFound("STACK_TRACES"))?)?;

    let mut records = Vec::new();
    for entry in counts.iter() {
        let (key, count) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Entries deleted mid-iteration end the walk early
                warn!("COUNTS iteration stopped: {e}");
                break;
            }
        };
        records.push(resolve_record(&key, count, &stack_traces, aggregator, resolver));
    }
    Ok(records)
}

fn resolve_record<T: Borrow<MapData>>(
    key: &SampleKey,
    count: u64,
    stack_traces: &StackTraceMap<T>,
    aggregator: &StackAggregator,
    resolver: &StackResolver<'_>,
) -> SampleRecord {
    let native = resolver.user_frames(StackId(key.user_stack_id), stack_traces);
    let kernel = StackResolver::kernel_frames(StackId(key.kern_stack_id), stack_traces, key.kernel_ip);
    sample_record(key, count, native, kernel, aggregator)
}

/// Remove every `COUNTS` entry, re-arming the sample gate for the next
/// epoch. Returns the number of entries removed.
///
/// # Errors
/// Returns an error if the map is missing
pub fn clear_counts(bpf: &mut Ebpf) -> Result<usize> {
    let mut counts: HashMap<_, SampleKey, u64> =
        HashMap::try_from(bpf.map_mut("COUNTS").context("COUNTS map not found")?)?;
    let keys: Vec<SampleKey> = counts.keys().filter_map(Result::ok).collect();
    let mut removed = 0;
    for key in &keys {
        if counts.remove(key).is_ok() {
            removed += 1;
        }
    }
    info!("Epoch reset: cleared {removed} sample keys");
    Ok(removed)
}
