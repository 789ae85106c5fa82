//! Structured error types for ljprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{Pid, StackId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Failed to attach {probe} to {binary}: {error}")]
    ProbeAttachFailed { probe: String, binary: String, error: String },

    #[error("eBPF map {0} not found in program")]
    MapNotFound(&'static str),

    #[error("Symbol resolution failed: {0}")]
    SymbolizationFailed(String),

    #[error("Failed to read /proc/{0}/maps")]
    MemoryMapsParseFailed(Pid),

    #[error("No memory range found for binary {binary} in process {pid}")]
    NoMemoryRangeFound { pid: Pid, binary: String },

    #[error("Cannot open memory of process {pid}: {source}")]
    MemoryOpenFailed {
        pid: Pid,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read lua_State at {addr:#x}")]
    StateUnreadable { addr: u64 },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aya(#[from] aya::EbpfError),
}

/// Rejected aggregator insert
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateError {
    #[error("level {level} of {stack_id} exceeds max depth {max_depth}")]
    DepthExceeded {
        stack_id: StackId,
        level: u32,
        max_depth: usize,
    },
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("invalid layout: {field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read layout file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write report file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
