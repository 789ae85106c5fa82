//! Profiling core modules
//!
//! - eBPF object loading, configuration and probe attachment
//! - Ring buffer event processing into the stack aggregator
//! - Native stack resolution and the end-of-run report
//! - Kernel diagnostics
//! - Userspace snapshot sampling through `/proc/<pid>/mem`

pub mod cpu_utils;
pub mod diagnostics;
pub mod ebpf_setup;
pub mod event_display;
pub mod event_processor;
pub mod report;
pub mod snapshot_sampler;
pub mod stack_resolver;

// Re-export common types
pub use cpu_utils::online_cpus;
pub use diagnostics::{print_diagnostics, read_diagnostics};
pub use ebpf_setup::{
    attach_lua_probes, configure, default_bpf_object, init_ebpf_logger, load_ebpf_program,
    start_perf_sampling, SamplingConfig,
};
pub use event_display::{
    backtrace_labels, display_frame_event, display_progress, display_statistics, format_frame_event, lua_frame_label,
    ProcessorStats,
};
pub use event_processor::EventProcessor;
pub use report::{clear_counts, collect_samples, sample_record};
pub use snapshot_sampler::{SnapshotSampler, SnapshotStats};
pub use stack_resolver::StackResolver;

// Re-export MemoryRange from symbolization for convenience
pub use crate::symbolization::MemoryRange;
