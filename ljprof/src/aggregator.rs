//! Reassembly of per-level Lua frame events into backtraces
//!
//! The kernel emits one [`LuaFrameEvent`] per call level, and nothing
//! guarantees the levels of one stack arrive in order or only once. The
//! [`StackAggregator`] slots each frame into the backtrace of its stack id by
//! level, so the finished backtrace is the same whatever the arrival order.
//!
//! Locking: the map lock is held only to find or create an entry; each entry
//! has its own mutex for the slot update.

use crate::domain::{AggregateError, StackId};
use ljprof_common::{LuaFrameEvent, ResolvedFrame};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Lua backtrace of one stack id, innermost frame at level 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackBacktrace {
    count: usize,
    frames: Vec<Option<ResolvedFrame>>,
}

impl StackBacktrace {
    fn with_capacity(max_depth: usize) -> Self {
        Self {
            count: 0,
            frames: vec![None; max_depth],
        }
    }

    fn store(&mut self, level: usize, frame: ResolvedFrame) {
        self.frames[level] = Some(frame);
        self.count = self.count.max(level + 1);
    }

    /// Highest level reported plus one.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Slots `0..count` in level order; levels never reported are `None`.
    pub fn frames(&self) -> &[Option<ResolvedFrame>] {
        &self.frames[..self.count]
    }

    pub fn frame(&self, level: usize) -> Option<&ResolvedFrame> {
        self.frames().get(level).and_then(Option::as_ref)
    }

    /// True when every level below `count` has been reported.
    pub fn is_complete(&self) -> bool {
        self.frames().iter().all(Option::is_some)
    }
}

/// Thread-safe map of stack id → [`StackBacktrace`].
pub struct StackAggregator {
    max_depth: usize,
    entries: RwLock<HashMap<StackId, Arc<Mutex<StackBacktrace>>>>,
}

impl StackAggregator {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Stores `frame` at `level` of `stack_id`'s backtrace.
    ///
    /// Later inserts at the same level replace earlier ones.
    ///
    /// # Errors
    /// [`AggregateError::DepthExceeded`] when `level >= max_depth`; nothing is
    /// stored and no entry is created.
    pub fn insert(
        &self,
        stack_id: StackId,
        level: u32,
        frame: ResolvedFrame,
    ) -> Result<(), AggregateError> {
        let slot = level as usize;
        if slot >= self.max_depth {
            return Err(AggregateError::DepthExceeded {
                stack_id,
                level,
                max_depth: self.max_depth,
            });
        }

        let entry = self.entry(stack_id);
        entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store(slot, frame);
        Ok(())
    }

    /// Inserts the frame carried by a kernel event.
    ///
    /// # Errors
    /// See [`StackAggregator::insert`].
    pub fn insert_event(&self, event: &LuaFrameEvent) -> Result<(), AggregateError> {
        self.insert(StackId(event.stack_id), event.frame.level, event.frame)
    }

    /// Snapshot of `stack_id`'s backtrace, `None` if nothing was inserted.
    pub fn get(&self, stack_id: StackId) -> Option<StackBacktrace> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stack_id)
            .cloned()?;
        let backtrace = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(StackBacktrace {
            count: backtrace.count,
            frames: backtrace.frames().to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stack ids with a backtrace, sorted.
    pub fn stack_ids(&self) -> Vec<StackId> {
        let mut ids: Vec<StackId> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    fn entry(&self, stack_id: StackId) -> Arc<Mutex<StackBacktrace>> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stack_id)
        {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(stack_id)
                .or_insert_with(|| Arc::new(Mutex::new(StackBacktrace::with_capacity(self.max_depth)))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua(level: u32, chunk: &str) -> ResolvedFrame {
        ResolvedFrame::lua(level, chunk.as_bytes(), 1)
    }

    #[test]
    fn test_out_of_order_levels() {
        let agg = StackAggregator::new(8);
        agg.insert(StackId(42), 1, lua(1, "b")).unwrap();
        agg.insert(StackId(42), 0, lua(0, "a")).unwrap();
        agg.insert(StackId(42), 1, lua(1, "b2")).unwrap();

        let bt = agg.get(StackId(42)).unwrap();
        assert_eq!(bt.count(), 2);
        assert_eq!(bt.frame(0).unwrap().chunk_name(), b"a");
        assert_eq!(bt.frame(1).unwrap().chunk_name(), b"b2");
    }

    #[test]
    fn test_gap_levels_stay_absent() {
        let agg = StackAggregator::new(8);
        agg.insert(StackId(1), 3, lua(3, "d")).unwrap();

        let bt = agg.get(StackId(1)).unwrap();
        assert_eq!(bt.count(), 4);
        assert!(bt.frame(0).is_none());
        assert!(!bt.is_complete());
    }

    #[test]
    fn test_depth_exceeded_creates_nothing() {
        let agg = StackAggregator::new(4);
        let err = agg.insert(StackId(9), 4, lua(4, "x")).unwrap_err();
        assert_eq!(
            err,
            AggregateError::DepthExceeded {
                stack_id: StackId(9),
                level: 4,
                max_depth: 4
            }
        );
        assert!(agg.get(StackId(9)).is_none());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_get_unknown_has_no_side_effects() {
        let agg = StackAggregator::new(4);
        assert!(agg.get(StackId(5)).is_none());
        assert_eq!(agg.len(), 0);
    }
}
