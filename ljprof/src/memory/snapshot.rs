//! Sparse in-memory address space.
//!
//! Holds only the bytes that were written; everything else is unmapped.
//! Individual addresses can be marked faulty so a read touching them fails
//! even though the bytes exist, which is how tests simulate a page being
//! unmapped mid-walk.

use ljprof_common::{MemoryFault, MemoryReader};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct SnapshotMemory {
    bytes: BTreeMap<u64, u8>,
    faults: BTreeSet<u64>,
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) {
        for (offset, &byte) in (0u64..).zip(bytes) {
            self.bytes.insert(addr + offset, byte);
        }
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) {
        self.write_bytes(addr, &[value]);
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    pub fn write_i32(&mut self, addr: u64, value: i32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    /// Writes a 4- or 8-byte little-endian word.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_word(&mut self, addr: u64, width: u32, value: u64) {
        match width {
            4 => self.write_u32(addr, value as u32),
            _ => self.write_u64(addr, value),
        }
    }

    /// Writes `s` followed by a NUL terminator.
    pub fn write_c_str(&mut self, addr: u64, s: &[u8]) {
        self.write_bytes(addr, s);
        self.write_u8(addr + s.len() as u64, 0);
    }

    /// Makes every read covering `addr` fail.
    pub fn inject_fault(&mut self, addr: u64) {
        self.faults.insert(addr);
    }

    pub fn clear_fault(&mut self, addr: u64) {
        self.faults.remove(&addr);
    }

    /// Forgets `len` bytes starting at `addr`.
    pub fn unmap(&mut self, addr: u64, len: u64) {
        let end = addr.saturating_add(len);
        let doomed: Vec<u64> = self.bytes.range(addr..end).map(|(&a, _)| a).collect();
        for a in doomed {
            self.bytes.remove(&a);
        }
    }

    /// Number of mapped bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl MemoryReader for SnapshotMemory {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(MemoryFault::at(addr))?;
        if let Some(&fault) = self.faults.range(addr..end).next() {
            return Err(MemoryFault::at(fault));
        }
        for (offset, slot) in (0u64..).zip(buf.iter_mut()) {
            let at = addr + offset;
            *slot = *self.bytes.get(&at).ok_or(MemoryFault::at(at))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_bytes_fault() {
        let mut mem = SnapshotMemory::new();
        mem.write_u32(0x1000, 0xdead_beef);
        assert_eq!(mem.read_u32(0x1000), Ok(0xdead_beef));
        assert_eq!(mem.read_u64(0x1000), Err(MemoryFault::at(0x1004)));
    }

    #[test]
    fn test_injected_fault() {
        let mut mem = SnapshotMemory::new();
        mem.write_u64(0x2000, 7);
        mem.inject_fault(0x2003);
        assert_eq!(mem.read_u64(0x2000), Err(MemoryFault::at(0x2003)));
        assert_eq!(mem.read_u8(0x2000), Ok(7));

        mem.clear_fault(0x2003);
        assert_eq!(mem.read_u64(0x2000), Ok(7));
    }

    #[test]
    fn test_unmap() {
        let mut mem = SnapshotMemory::new();
        mem.write_c_str(0x3000, b"abc");
        assert_eq!(mem.len(), 4);
        mem.unmap(0x3001, 2);
        assert_eq!(mem.len(), 2);
        assert!(mem.read_u8(0x3001).is_err());
    }

    #[test]
    fn test_c_str_through_trait() {
        let mut mem = SnapshotMemory::new();
        mem.write_c_str(0x4000, b"=stdin");
        let mut buf = [0u8; 16];
        assert_eq!(mem.read_c_str(0x4000, &mut buf), Ok(6));
        assert_eq!(&buf[..7], b"=stdin\0");
    }
}
