//! Userspace [`MemoryReader`](ljprof_common::MemoryReader) implementations
//!
//! - [`ProcessMemory`]: a live process through `/proc/<pid>/mem`
//! - [`SnapshotMemory`]: a sparse in-memory image with fault injection, for
//!   replaying captured state and for tests

pub mod process;
pub mod snapshot;

pub use process::ProcessMemory;
pub use snapshot::SnapshotMemory;
