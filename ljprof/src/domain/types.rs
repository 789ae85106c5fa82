//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent passing a TID where a PID is expected, and
//! keep stack ids (which may be negative "not captured" markers) distinct
//! from plain integers.

use std::fmt;

/// Process ID (thread group id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    #[allow(clippy::cast_sign_loss)]
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

impl From<Pid> for i32 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// Thread ID
///
/// The kernel's per-thread id; the pending `lua_State` table is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...). One perf event is opened per CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Stack trace ID from eBPF
///
/// Assigned by `bpf_get_stackid`; also the key Lua backtraces are
/// aggregated under. Negative values indicate no stack trace was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId(pub i64);

impl StackId {
    /// Returns true if this stack ID is valid (non-negative)
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Key for the `STACK_TRACES` map, `None` for invalid ids
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn as_map_key(self) -> Option<u32> {
        self.is_valid().then_some(self.0 as u32)
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack#{}", self.0)
    }
}
