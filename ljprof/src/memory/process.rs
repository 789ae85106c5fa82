//! Reads another process's memory through `/proc/<pid>/mem`.
//!
//! Requires ptrace access to the target (root or `CAP_SYS_PTRACE`). Reads are
//! not synchronized with the target; see the walker docs for how torn reads
//! are handled.

use crate::domain::{Pid, ProfilerError};
use ljprof_common::{MemoryFault, MemoryReader};
use std::fs::File;
use std::os::unix::fs::FileExt;

pub struct ProcessMemory {
    pid: Pid,
    mem: File,
}

impl ProcessMemory {
    /// Opens the memory of `pid` for reading.
    ///
    /// # Errors
    /// [`ProfilerError::MemoryOpenFailed`] if the file cannot be opened.
    pub fn open(pid: Pid) -> Result<Self, ProfilerError> {
        let path = format!("/proc/{}/mem", pid.0);
        let mem = File::open(&path).map_err(|source| ProfilerError::MemoryOpenFailed { pid, source })?;
        Ok(Self { pid, mem })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl MemoryReader for ProcessMemory {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        if addr == 0 {
            return Err(MemoryFault::at(addr));
        }
        self.mem
            .read_exact_at(buf, addr)
            .map_err(|_| MemoryFault::at(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_own_memory() {
        let value: u64 = 0x1122_3344_5566_7788;
        let mem = ProcessMemory::open(Pid(std::process::id())).unwrap();
        let addr = std::ptr::addr_of!(value) as u64;
        assert_eq!(mem.read_u64(addr), Ok(value));
    }

    #[test]
    fn test_null_read_faults() {
        let mem = ProcessMemory::open(Pid(std::process::id())).unwrap();
        assert_eq!(mem.read_u8(0), Err(MemoryFault::at(0)));
    }

    #[test]
    fn test_missing_process() {
        let err = ProcessMemory::open(Pid(u32::MAX)).err().unwrap();
        assert!(matches!(err, ProfilerError::MemoryOpenFailed { .. }));
    }
}
