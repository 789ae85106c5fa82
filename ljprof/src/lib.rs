//! # ljprof - eBPF sampling profiler for LuaJIT in OpenResty
//!
//! ljprof samples CPU stacks of an nginx/OpenResty worker and, for samples
//! taken while Lua code runs, walks LuaJIT's own frame chain to recover the
//! Lua call stack. Native samples alone only show the interpreter loop
//! (`lj_BC_*`, `lj_vm_*`), never which Lua function was running.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 nginx worker (LuaJIT embedded)                  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ lua_resume(L, ...)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │  • Uprobe/uretprobe: entry symbol records/clears L per thread   │
//! │  • Perf Event: CPU sampling, COUNTS per SampleKey               │
//! │  • First hit of a key: FrameWalker + FunctionResolver           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ one LuaFrameEvent per level (ring buffer)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ljprof (This Crate)                        │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Profiling   │──▶│    Event     │──▶│    Stack     │         │
//! │  │   (eBPF)     │   │  Processor   │   │  Aggregator  │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │                 │
//! │  ┌──────────────┐   ┌──────────────┐          ▼                 │
//! │  │ Symbolizer   │──▶│    Report    │──▶ folded / JSON export    │
//! │  │  (DWARF)     │   │ (COUNTS join)│                            │
//! │  └──────────────┘   └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: eBPF loading and attachment, event processing, report
//!   assembly, and the userspace snapshot sampler
//! - [`aggregator`]: reassembles per-level frame events into backtraces
//! - [`symbolization`]: native addresses to function names (DWARF, ELF symbols)
//! - [`memory`]: `MemoryReader`s over `/proc/<pid>/mem` and in-memory images
//! - [`gate_store`]: bounded userspace stores for the sample gate
//! - [`layout_config`]: interpreter offsets, presets and JSON overrides
//! - [`export`]: folded stacks and JSON report
//! - [`cli`], [`preflight`], [`process_lookup`]: the command-line shell
//! - [`domain`]: newtypes and error types
//!
//! ## Typical Usage
//!
//! ```bash
//! # Profile one worker for 30 seconds and render a flamegraph
//! sudo ./ljprof --pid <PID> --duration 30 --folded out.folded
//! flamegraph.pl out.folded > lua.svg
//!
//! # Check a layout against a live lua_State without eBPF
//! sudo ./ljprof snapshot --pid <PID> --state 0x7f3a2c001380
//! ```

pub mod aggregator;
pub mod cli;
pub mod domain;
pub mod export;
pub mod gate_store;
pub mod layout_config;
pub mod memory;
pub mod preflight;
pub mod process_lookup;
pub mod profiling;
pub mod symbolization;
