//! Report export
//!
//! Every counted sample becomes a [`SampleRecord`]: the native user frames,
//! the Lua backtrace and the kernel frames, each ordered outermost first.
//! Records are written as folded stacks for flamegraph tools or as JSON.

pub mod folded;
pub mod json;

pub use folded::{fold_line, write_folded};
pub use json::{write_json, JsonReport};

use serde::{Deserialize, Serialize};

/// One counted stack with its resolved frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub comm: String,
    pub pid: u32,
    pub count: u64,
    /// Native user frames, outermost first
    pub native: Vec<String>,
    /// Lua frames, outermost first
    pub lua: Vec<String>,
    /// Kernel frames, outermost first
    pub kernel: Vec<String>,
}

impl SampleRecord {
    /// True when the sample carries a Lua backtrace
    #[must_use]
    pub fn has_lua(&self) -> bool {
        !self.lua.is_empty()
    }
}

/// Total sample count across `records`
#[must_use]
pub fn total_samples(records: &[SampleRecord]) -> u64 {
    records.iter().map(|r| r.count).sum()
}
