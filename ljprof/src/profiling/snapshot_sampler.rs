//! Userspace sampling of one `lua_State`
//!
//! Runs the same walker and resolver as the kernel program, but reads the
//! target through a [`MemoryReader`] such as `/proc/<pid>/mem`. Useful to
//! check a layout against a live process before loading any eBPF.
//!
//! Each read walks the frame chain without resolving it. The chain of
//! function addresses keys a [`SampleGate`]; only the first read of a chain
//! resolves its frames into the [`StackAggregator`], later reads just count.

use ljprof_common::{
    FrameLayout, FrameWalker, FunctionResolver, GateDecision, MemoryReader, SampleGate, ThreadState,
};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::Duration;

use super::event_display::backtrace_labels;
use crate::aggregator::StackAggregator;
use crate::domain::{ProfilerError, StackId};
use crate::export::SampleRecord;
use crate::gate_store::BoundedCounterStore;

/// Distinct chains remembered per run
const MAX_CHAINS: usize = 16384;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    pub reads: u64,
    pub unreadable: u64,
    /// State readable but no Lua frame found (thread outside Lua)
    pub empty: u64,
    pub resolved: u64,
    pub dropped: u64,
    pub depth_exceeded: u64,
}

pub struct SnapshotSampler<R> {
    reader: R,
    layout: FrameLayout,
    state_addr: u64,
    walk_steps: u32,
    pid: u32,
    comm: String,
    gate: SampleGate<BoundedCounterStore<Vec<u64>>>,
    aggregator: StackAggregator,
    stack_ids: HashMap<Vec<u64>, StackId>,
    pub stats: SnapshotStats,
}

impl<R: MemoryReader> SnapshotSampler<R> {
    pub fn new(reader: R, layout: FrameLayout, state_addr: u64, walk_steps: u32, max_depth: usize) -> Self {
        Self {
            reader,
            layout,
            state_addr,
            walk_steps,
            pid: 0,
            comm: String::new(),
            gate: SampleGate::new(BoundedCounterStore::new(MAX_CHAINS)),
            aggregator: StackAggregator::new(max_depth),
            stack_ids: HashMap::new(),
            stats: SnapshotStats::default(),
        }
    }

    /// Process identity written into the records
    #[must_use]
    pub fn with_process(mut self, pid: u32, comm: impl Into<String>) -> Self {
        self.pid = pid;
        self.comm = comm.into();
        self
    }

    pub fn aggregator(&self) -> &StackAggregator {
        &self.aggregator
    }

    /// Reads the state once. Returns `None` when no Lua frame was found.
    ///
    /// # Errors
    /// [`ProfilerError::StateUnreadable`] when the `lua_State` itself cannot
    /// be read
    pub fn sample_once(&mut self) -> Result<Option<GateDecision>, ProfilerError> {
        self.stats.reads += 1;
        let state = ThreadState::read(&self.reader, self.state_addr, &self.layout).map_err(|fault| {
            self.stats.unreadable += 1;
            debug!("lua_State read failed at {:#x}", fault.addr);
            ProfilerError::StateUnreadable { addr: self.state_addr }
        })?;

        let candidates: Vec<_> = FrameWalker::new(&self.reader, &self.layout, &state, self.walk_steps).collect();
        if candidates.is_empty() {
            self.stats.empty += 1;
            return Ok(None);
        }

        let chain: Vec<u64> = candidates.iter().map(|c| c.func).collect();
        let decision = self.gate.admit(&chain);
        match decision {
            GateDecision::Resolve => {
                let next_id = StackId(i64::try_from(self.stack_ids.len()).unwrap_or(i64::MAX));
                let stack_id = *self.stack_ids.entry(chain).or_insert(next_id);
                let resolver = FunctionResolver::new(&self.reader, &self.layout);
                for candidate in &candidates {
                    let frame = resolver.resolve(candidate);
                    if let Err(e) = self.aggregator.insert(stack_id, frame.level, frame) {
                        self.stats.depth_exceeded += 1;
                        debug!("{e}");
                    }
                }
                self.stats.resolved += 1;
            }
            GateDecision::Skip => {}
            GateDecision::Dropped => self.stats.dropped += 1,
        }
        Ok(Some(decision))
    }

    /// Reads the state `samples` times, `interval` apart.
    ///
    /// # Errors
    /// Returns an error only when not a single read succeeded
    pub fn run(&mut self, samples: u32, interval: Duration) -> Result<(), ProfilerError> {
        let mut last_error = None;
        for i in 0..samples {
            if let Err(e) = self.sample_once() {
                last_error = Some(e);
            }
            if i + 1 < samples && !interval.is_zero() {
                std::thread::sleep(interval);
            }
        }
        match last_error {
            Some(e) if self.stats.unreadable == self.stats.reads => Err(e),
            Some(e) => {
                warn!("{} of {} reads failed: {e}", self.stats.unreadable, self.stats.reads);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// One record per distinct chain, with its read count.
    #[must_use]
    pub fn records(&self) -> Vec<SampleRecord> {
        self.gate
            .store()
            .snapshot()
            .into_iter()
            .filter_map(|(chain, count)| {
                let backtrace = self.aggregator.get(*self.stack_ids.get(&chain)?)?;
                Some(SampleRecord {
                    comm: self.comm.clone(),
                    pid: self.pid,
                    count,
                    native: Vec::new(),
                    lua: backtrace_labels(&backtrace),
                    kernel: Vec::new(),
                })
            })
            .collect()
    }
}
