//! # eBPF Kernel-Side Lua Stack Sampler
//!
//! Runs the shared frame walker and resolver from `ljprof-common` inside the
//! kernel, reading the target's memory with `bpf_probe_read_user`.
//!
//! ## Programs
//!
//! - **Perf Event**: `on_cpu_sample` - CPU sampling; walks the Lua stack of the
//!   first sample of each distinct stack
//! - **Uprobe**: `lua_entry_hook` - records the `lua_State*` a thread enters
//! - **Uretprobe**: `lua_exit_hook` - forgets it when the entry function returns
//! - **Uprobe**: `lua_cancel_hook` - forgets it on request cancellation
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer of `LuaFrameEvent`s, one per Lua call level
//! - `STACK_TRACES` - Native stacks by id
//! - `COUNTS` - `SampleKey` → hit count (also the sample gate store)
//! - `PENDING` - tid → `PendingRequest`
//! - `LAYOUT` - the `FrameLayout` of the target's LuaJIT
//! - `CONFIG` - Runtime configuration (target PID, walk steps, flags)
//! - `DIAGNOSTICS` - Counters printed at exit
//!
//! ## Build
//!
//! Always compiled in release mode:
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_probe_read_user_buf,
        bpf_probe_read_user_str_bytes,
    },
    macros::{map, perf_event, uprobe, uretprobe},
    maps::{Array, HashMap, RingBuf, StackTrace},
    programs::{PerfEventContext, ProbeContext, RetProbeContext},
    EbpfContext,
};
use aya_log_ebpf::debug;
use core::sync::atomic::{AtomicU64, Ordering};
use ljprof_common::{
    is_kernel_address, CapacityExhausted, CounterStore, FrameLayout, FrameWalker,
    FunctionResolver, GateDecision, LuaFrameEvent, MemoryFault, MemoryReader, PendingRequest,
    PendingRequests, PendingStore, SampleGate, SampleKey, ThreadState, CONFIG_FLAGS,
    CONFIG_STATE_ARG, CONFIG_TARGET_PID, CONFIG_TARGET_TID, CONFIG_WALK_STEPS, DIAG_COUNTERS,
    DIAG_ENTRY_HITS, DIAG_FRAMES_EMITTED, DIAG_GATE_ADMITTED, DIAG_GATE_FULL, DIAG_NO_STATE,
    DIAG_OUTPUT_FAILED, DIAG_SAMPLES, FLAG_INCLUDE_IDLE, FLAG_KERNEL_STACKS_ONLY,
    FLAG_USER_STACKS_ONLY, MAX_WALK_STEPS, NO_STACK, TASK_COMM_LEN,
};

// ============================================================================
// Constants
// ============================================================================

/// `bpf_get_stackid` flag selecting the user stack
const BPF_F_USER_STACK: u64 = 0x100;

/// `bpf_map_update_elem` flag: only create, never overwrite
const BPF_NOEXIST: u64 = 1;

/// Index of the instruction pointer in the sampled `pt_regs`
/// (`ip` on x86_64, `pc` on aarch64)
#[cfg(not(feature = "aarch64"))]
const PT_REGS_IP_INDEX: usize = 16;
#[cfg(feature = "aarch64")]
const PT_REGS_IP_INDEX: usize = 32;

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Ring buffer for resolved Lua frames
///
/// - **Size**: 4MB
/// - **Usage**: Kernel writes with `EVENTS.output()`, userspace reads with `ring_buf.next()`
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(4 * 1024 * 1024, 0);

/// Native stack traces by id
///
/// A full map makes `bpf_get_stackid` fail, which turns into `NO_STACK`
/// in the sample key.
#[map]
static STACK_TRACES: StackTrace = StackTrace::with_max_entries(16384, 0);

/// Map: sample identity → number of samples
///
/// Serves as the sample gate store: a key's first hit triggers the Lua walk.
#[map]
static COUNTS: HashMap<SampleKey, u64> = HashMap::with_max_entries(16384, 0);

/// Map: Thread ID (TID) → `lua_State` the thread is executing
#[map]
static PENDING: HashMap<u32, PendingRequest> = HashMap::with_max_entries(8192, 0);

/// Layout of the target's LuaJIT, written once by userspace
#[map]
static LAYOUT: Array<FrameLayout> = Array::with_max_entries(1, 0);

/// Map: Config key → Config value
///
/// Keys are the `CONFIG_*` constants of `ljprof-common`.
#[map]
static CONFIG: HashMap<u32, u64> = HashMap::with_max_entries(16, 0);

/// Map: `DIAG_*` counter → value
#[map]
static DIAGNOSTICS: HashMap<u32, u64> = HashMap::with_max_entries(DIAG_COUNTERS, 0);

// ============================================================================
// Store adapters for the shared core
// ============================================================================

/// The target's address space, read through `bpf_probe_read_user`.
struct UserMemory;

impl MemoryReader for UserMemory {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        unsafe { bpf_probe_read_user_buf(addr as *const u8, buf) }.map_err(|_| MemoryFault::at(addr))
    }

    fn read_c_str(&self, addr: u64, buf: &mut [u8]) -> Result<usize, MemoryFault> {
        unsafe { bpf_probe_read_user_str_bytes(addr as *const u8, buf) }
            .map(<[u8]>::len)
            .map_err(|_| MemoryFault::at(addr))
    }
}

struct CountsMap;

impl CounterStore<SampleKey> for CountsMap {
    fn fetch_increment(&self, key: &SampleKey) -> Result<u64, CapacityExhausted> {
        if COUNTS.get_ptr_mut(key).is_none() {
            // Losing the insert race to another CPU is fine; a full map is not.
            let _ = COUNTS.insert(key, &0, BPF_NOEXIST);
        }
        let ptr = COUNTS.get_ptr_mut(key).ok_or(CapacityExhausted)?;
        let counter = unsafe { AtomicU64::from_ptr(ptr) };
        Ok(counter.fetch_add(1, Ordering::Relaxed))
    }
}

struct PendingMap;

impl PendingStore for PendingMap {
    fn put(&self, tid: u32, request: &PendingRequest) -> Result<(), CapacityExhausted> {
        PENDING.insert(&tid, request, 0).map_err(|_| CapacityExhausted)
    }

    fn get(&self, tid: u32) -> Option<PendingRequest> {
        unsafe { PENDING.get(&tid).copied() }
    }

    fn remove(&self, tid: u32) {
        let _ = PENDING.remove(&tid);
    }
}

#[inline(always)]
fn config(key: u32, default: u64) -> u64 {
    unsafe { CONFIG.get(&key).copied().unwrap_or(default) }
}

#[inline(always)]
fn bump(counter: u32) {
    unsafe {
        let current = DIAGNOSTICS.get(&counter).copied().unwrap_or(0);
        let _ = DIAGNOSTICS.insert(&counter, &(current + 1), 0);
    }
}

/// Applies the PID filter; returns `(pid, tid)` for samples to keep.
#[inline(always)]
fn current_target() -> Option<(u32, u32)> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    let pid = (pid_tgid >> 32) as u32;
    let tid = pid_tgid as u32;
    let target_pid = config(CONFIG_TARGET_PID, 0) as u32;
    if target_pid != 0 && pid != target_pid {
        return None;
    }
    Some((pid, tid))
}

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Hook: entry of the function that runs Lua code (`lua_resume` by default)
#[uprobe]
pub fn lua_entry_hook(ctx: ProbeContext) -> u32 {
    match try_lua_entry(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_lua_entry(ctx: &ProbeContext) -> Result<(), i64> {
    let Some((pid, tid)) = current_target() else {
        return Ok(());
    };

    let state: u64 = match config(CONFIG_STATE_ARG, 0) {
        0 => ctx.arg(0),
        1 => ctx.arg(1),
        2 => ctx.arg(2),
        _ => ctx.arg(3),
    }
    .ok_or(1i64)?;
    if state == 0 {
        return Ok(());
    }

    PendingRequests::new(PendingMap)
        .enter(tid, &PendingRequest::new(pid, state))
        .map_err(|_| 1i64)?;
    bump(DIAG_ENTRY_HITS);
    debug!(ctx, "tid {} entered lua_State {:x}", tid, state);
    Ok(())
}

/// Hook: return of the entry function
#[uretprobe]
pub fn lua_exit_hook(_ctx: RetProbeContext) -> u32 {
    if let Some((_, tid)) = current_target() {
        PendingRequests::new(PendingMap).exit(tid);
    }
    0
}

/// Hook: request cancellation; only acts when its 2nd and 4th arguments are set
#[uprobe]
pub fn lua_cancel_hook(ctx: ProbeContext) -> u32 {
    let second: u64 = ctx.arg(1).unwrap_or(0);
    let fourth: u64 = ctx.arg(3).unwrap_or(0);
    if second == 0 || fourth == 0 {
        return 0;
    }
    if let Some((_, tid)) = current_target() {
        PendingRequests::new(PendingMap).exit(tid);
    }
    0
}

/// CPU Sampling Profiler - counts samples per `SampleKey` and walks the Lua
/// stack on each key's first hit
#[perf_event]
pub fn on_cpu_sample(ctx: PerfEventContext) -> u32 {
    match try_on_cpu_sample(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_on_cpu_sample(ctx: &PerfEventContext) -> Result<(), i64> {
    bump(DIAG_SAMPLES);

    let Some((pid, tid)) = current_target() else {
        return Ok(());
    };
    let flags = config(CONFIG_FLAGS, 0);
    if tid == 0 && flags & FLAG_INCLUDE_IDLE == 0 {
        return Ok(());
    }
    let target_tid = config(CONFIG_TARGET_TID, 0) as u32;
    if target_tid != 0 && tid != target_tid {
        return Ok(());
    }

    let kern_stack_id = if flags & FLAG_USER_STACKS_ONLY == 0 {
        unsafe { STACK_TRACES.get_stackid(ctx, 0) }.unwrap_or(NO_STACK)
    } else {
        NO_STACK
    };
    let user_stack_id = if flags & FLAG_KERNEL_STACKS_ONLY == 0 {
        unsafe { STACK_TRACES.get_stackid(ctx, BPF_F_USER_STACK) }.unwrap_or(NO_STACK)
    } else {
        NO_STACK
    };

    // Frame-pointer stacks skip the sampled function itself; keep the IP so
    // the report can put it back on top of the kernel stack.
    let kernel_ip = if kern_stack_id >= 0 {
        let ip = sampled_ip(ctx);
        if is_kernel_address(ip) {
            ip
        } else {
            0
        }
    } else {
        0
    };

    let key = SampleKey {
        pid,
        _padding: 0,
        kernel_ip,
        user_stack_id,
        kern_stack_id,
        comm: unsafe { bpf_get_current_comm() }.unwrap_or([0u8; TASK_COMM_LEN]),
    };

    match SampleGate::new(CountsMap).admit(&key) {
        GateDecision::Resolve => bump(DIAG_GATE_ADMITTED),
        GateDecision::Skip => return Ok(()),
        GateDecision::Dropped => {
            bump(DIAG_GATE_FULL);
            return Ok(());
        }
    }

    if user_stack_id < 0 {
        return Ok(());
    }
    let Some(request) = PendingRequests::new(PendingMap).lookup(tid) else {
        bump(DIAG_NO_STATE);
        return Ok(());
    };
    emit_lua_stack(pid, tid, user_stack_id, request.state)
}

fn emit_lua_stack(pid: u32, tid: u32, stack_id: i64, state_addr: u64) -> Result<(), i64> {
    let Some(layout) = LAYOUT.get(0) else {
        return Err(1);
    };
    let reader = UserMemory;
    let state = ThreadState::read(&reader, state_addr, layout).map_err(|_| 1i64)?;
    let steps = (config(CONFIG_WALK_STEPS, u64::from(MAX_WALK_STEPS)) as u32).min(MAX_WALK_STEPS);

    let resolver = FunctionResolver::new(&reader, layout);
    for candidate in FrameWalker::new(&reader, layout, &state, steps) {
        let event = LuaFrameEvent {
            pid,
            tid,
            stack_id,
            frame: resolver.resolve(&candidate),
        };
        match unsafe { EVENTS.output(&event, 0) } {
            Ok(()) => bump(DIAG_FRAMES_EMITTED),
            Err(_) => bump(DIAG_OUTPUT_FAILED),
        }
    }
    Ok(())
}

/// Instruction pointer at the time of the sample.
#[inline(always)]
fn sampled_ip(ctx: &PerfEventContext) -> u64 {
    let regs = ctx.as_ptr() as *const u64;
    unsafe { *regs.add(PT_REGS_IP_INDEX) }
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
