//! # Event Processing
//!
//! Consumes `LuaFrameEvent`s from the eBPF ring buffer and folds them into the
//! [`StackAggregator`].
//!
//! ## Output Modes
//!
//! - **Aggregate**: every event is inserted by (stack id, level)
//! - **Stream**: events are also forwarded on a bounded channel for live
//!   consumers; a full channel drops the copy, never the aggregation

use crossbeam_channel::{Sender, TrySendError};
use ljprof_common::LuaFrameEvent;
use log::{debug, warn};

use super::event_display::ProcessorStats;
use crate::aggregator::StackAggregator;
use crate::domain::{AggregateError, StackId};

/// Encapsulates event processing logic and state
pub struct EventProcessor<'a> {
    aggregator: &'a StackAggregator,
    pub stats: ProcessorStats,
    stream_tx: Option<Sender<LuaFrameEvent>>,
}

impl<'a> EventProcessor<'a> {
    #[must_use]
    pub fn new(aggregator: &'a StackAggregator, stream_tx: Option<Sender<LuaFrameEvent>>) -> Self {
        Self { aggregator, stats: ProcessorStats::default(), stream_tx }
    }

    /// Decode and process one ring buffer record
    pub fn process_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() < std::mem::size_of::<LuaFrameEvent>() {
            self.stats.truncated += 1;
            warn!("Truncated ring buffer record: {} bytes", bytes.len());
            return;
        }
        // SAFETY: length checked above; LuaFrameEvent is repr(C) plain data
        #[allow(unsafe_code)]
        let event = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<LuaFrameEvent>()) };
        self.process_event(event);
    }

    /// Process a single event
    pub fn process_event(&mut self, event: LuaFrameEvent) {
        self.stats.events += 1;

        let stack_id = StackId(event.stack_id);
        if !stack_id.is_valid() {
            self.stats.invalid_stack += 1;
            return;
        }

        match self.aggregator.insert_event(&event) {
            Ok(()) => debug!("{stack_id} level {} from tid {}", event.frame.level, event.tid),
            Err(e @ AggregateError::DepthExceeded { .. }) => {
                self.stats.depth_exceeded += 1;
                warn!("Dropped Lua frame: {e}");
            }
        }

        if let Some(tx) = &self.stream_tx {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.stats.stream_dropped += 1,
                Err(TrySendError::Disconnected(_)) => self.stream_tx = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ljprof_common::ResolvedFrame;

    fn event(stack_id: i64, level: u32) -> LuaFrameEvent {
        LuaFrameEvent { pid: 1, tid: 2, stack_id, frame: ResolvedFrame::lua(level, b"@x.lua", 3) }
    }

    fn as_bytes(event: &LuaFrameEvent) -> Vec<u8> {
        let size = std::mem::size_of::<LuaFrameEvent>();
        let ptr = std::ptr::from_ref(event).cast::<u8>();
        #[allow(unsafe_code)]
        let bytes = unsafe { std::slice::from_raw_parts(ptr, size) };
        bytes.to_vec()
    }

    #[test]
    fn test_bytes_reach_aggregator() {
        let agg = StackAggregator::new(4);
        let mut processor = EventProcessor::new(&agg, None);
        processor.process_bytes(&as_bytes(&event(9, 1)));
        processor.process_bytes(&[0u8; 8]);

        assert_eq!(processor.stats.events, 1);
        assert_eq!(processor.stats.truncated, 1);
        assert_eq!(agg.get(StackId(9)).unwrap().count(), 2);
    }

    #[test]
    fn test_invalid_and_deep_events() {
        let agg = StackAggregator::new(2);
        let mut processor = EventProcessor::new(&agg, None);
        processor.process_event(event(-14, 0));
        processor.process_event(event(3, 2));

        assert_eq!(processor.stats.invalid_stack, 1);
        assert_eq!(processor.stats.depth_exceeded, 1);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_stream_drops_when_full() {
        let agg = StackAggregator::new(4);
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut processor = EventProcessor::new(&agg, Some(tx));
        processor.process_event(event(1, 0));
        processor.process_event(event(1, 1));

        assert_eq!(rx.try_recv().unwrap().frame.level, 0);
        assert_eq!(processor.stats.stream_dropped, 1);
        assert_eq!(agg.get(StackId(1)).unwrap().count(), 2);
    }
}
