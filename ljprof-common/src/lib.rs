//! # Shared LuaJIT Frame-Walking Core (eBPF ↔ Userspace)
//!
//! Everything here runs both inside the kernel-side perf_event program and in
//! userspace, so the crate is `no_std` and allocation-free. All types that
//! cross the kernel/userspace boundary use `#[repr(C)]`.
//!
//! ## Modules
//!
//! - [`layout`] - [`FrameLayout`]: field offsets of one LuaJIT build
//! - [`tagged`] - [`TaggedRef`]: pointer/type-tag decoding
//! - [`gc`] - GC object headers and function records
//! - [`frame`] - frame links, thread state and candidate frames
//! - [`memory`] - the fallible [`MemoryReader`] every dereference goes through
//! - [`walker`] - [`FrameWalker`]: backward traversal of the frame chain
//! - [`resolver`] - [`FunctionResolver`]: frame → [`ResolvedFrame`]
//! - [`gate`] - [`SampleGate`] and [`PendingRequests`]
//!
//! ## Data Flow
//!
//! ```text
//! perf_event sample ──▶ SampleGate ──▶ PendingRequests ──▶ FrameWalker
//!                                                              │
//!                      LuaFrameEvent (ring buffer) ◀── FunctionResolver
//! ```

#![cfg_attr(not(test), no_std)]

pub mod frame;
pub mod gate;
pub mod gc;
pub mod layout;
pub mod memory;
pub mod resolver;
pub mod tagged;
pub mod walker;

pub use frame::{CandidateFrame, FrameKind, FrameLink, ThreadState};
pub use gate::{
    CapacityExhausted, CounterStore, GateDecision, PendingRequest, PendingRequests, PendingStore,
    SampleGate,
};
pub use gc::{FunctionRecord, GcHeader, GcKind};
pub use layout::FrameLayout;
pub use memory::{MemoryFault, MemoryReader};
pub use resolver::{FrameDisplay, FuncKind, FunctionResolver, ResolvedFrame, FUNC_NAME_LEN};
pub use tagged::TaggedRef;
pub use walker::FrameWalker;

// ============================================================================
// Limits
// ============================================================================

/// Hard ceiling on frames visited per sample in the kernel
///
/// Keeps the walk loop provably bounded for the verifier. Userspace may ask
/// for fewer steps through `CONFIG_WALK_STEPS`, never more.
pub const MAX_WALK_STEPS: u32 = 12;

/// Default backtrace capacity of the userspace aggregator
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Length of `task_struct::comm`
pub const TASK_COMM_LEN: usize = 16;

/// Stack id value meaning "not captured"
pub const NO_STACK: i64 = -1;

// ============================================================================
// CONFIG map keys
// ============================================================================

/// Target process id (0 = all processes)
pub const CONFIG_TARGET_PID: u32 = 0;

/// Walker step limit, clamped to [`MAX_WALK_STEPS`]
pub const CONFIG_WALK_STEPS: u32 = 1;

/// Only sample this thread id (0 = all threads)
pub const CONFIG_TARGET_TID: u32 = 2;

/// Bitwise OR of the `FLAG_*` values
pub const CONFIG_FLAGS: u32 = 3;

/// Index of the entry-probe argument holding the `lua_State*`
pub const CONFIG_STATE_ARG: u32 = 4;

/// Skip kernel stacks
pub const FLAG_USER_STACKS_ONLY: u64 = 1 << 0;

/// Skip user stacks (and with them the Lua walk)
pub const FLAG_KERNEL_STACKS_ONLY: u64 = 1 << 1;

/// Keep samples taken while the CPU was idle (tid 0)
pub const FLAG_INCLUDE_IDLE: u64 = 1 << 2;

// ============================================================================
// DIAGNOSTICS map keys
// ============================================================================

/// perf_event samples that reached the program
pub const DIAG_SAMPLES: u32 = 0;

/// Samples admitted by the gate for Lua resolution
pub const DIAG_GATE_ADMITTED: u32 = 1;

/// Samples dropped because `COUNTS` was full
pub const DIAG_GATE_FULL: u32 = 2;

/// Admitted samples whose thread had no pending `lua_State`
pub const DIAG_NO_STATE: u32 = 3;

/// `LuaFrameEvent`s written to the ring buffer
pub const DIAG_FRAMES_EMITTED: u32 = 4;

/// Ring buffer reservations that failed
pub const DIAG_OUTPUT_FAILED: u32 = 5;

/// Entry probe hits that stored a pending state
pub const DIAG_ENTRY_HITS: u32 = 6;

pub const DIAG_COUNTERS: u32 = 7;

// ============================================================================
// Wire structures
// ============================================================================

/// Sample identity: the key of the kernel `COUNTS` map
///
/// Doubles as the [`SampleGate`] context key, so each distinct
/// (process, native stack, kernel stack) tuple is walked once and counted on
/// every later hit.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub pid: u32,
    pub _padding: u32,
    /// Sampled instruction pointer when it was a kernel address, else 0
    pub kernel_ip: u64,
    /// User stack id in `STACK_TRACES`, or [`NO_STACK`]
    pub user_stack_id: i64,
    /// Kernel stack id in `STACK_TRACES`, or [`NO_STACK`]
    pub kern_stack_id: i64,
    pub comm: [u8; TASK_COMM_LEN],
}

impl SampleKey {
    /// Command name without trailing NULs.
    #[must_use]
    pub fn comm(&self) -> &[u8] {
        let len = self
            .comm
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TASK_COMM_LEN);
        &self.comm[..len]
    }
}

/// True for addresses in the kernel half of the address space.
#[must_use]
pub const fn is_kernel_address(addr: u64) -> bool {
    addr & (1 << 63) != 0
}

/// One resolved Lua frame of one sampled stack
///
/// The kernel emits one event per call level; userspace reassembles them by
/// `stack_id`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LuaFrameEvent {
    pub pid: u32,
    pub tid: u32,
    /// User stack id of the sample (the aggregation key)
    pub stack_id: i64,
    pub frame: ResolvedFrame,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for LuaFrameEvent {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for SampleKey {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FrameLayout {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PendingRequest {}
