//! Memory mapping utilities for process address space analysis
//!
//! Parses /proc/pid/maps to find where the target binary is loaded, which is
//! needed to rebase sampled addresses of position-independent executables
//! before symbolization.

use anyhow::{Context, Result};
use log::info;
use std::fs;

/// Memory range of a loaded binary in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Parse /proc/pid/maps to find the memory range of a specific binary
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or if the binary is not mapped
pub fn parse_memory_maps(pid: i32, binary_path: &str) -> Result<MemoryRange> {
    let maps_path = format!("/proc/{pid}/maps");
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;

    let range = memory_range_in(&maps, binary_path)
        .with_context(|| format!("Could not find memory range for {binary_path}"))?;
    info!(
        "Executable memory range: 0x{:x} - 0x{:x} (size: {} KB)",
        range.start,
        range.end,
        (range.end - range.start) / 1024
    );
    Ok(range)
}

/// Span from the lowest start to the highest end of every mapping whose
/// pathname is exactly `binary_path`.
#[must_use]
pub fn memory_range_in(maps: &str, binary_path: &str) -> Option<MemoryRange> {
    let mut span: Option<MemoryRange> = None;

    for line in maps.lines() {
        // "start-end perms offset dev inode pathname"
        let mut fields = line.split_whitespace();
        let Some(range) = fields.next() else { continue };
        if fields.nth(4) != Some(binary_path) {
            continue;
        }
        let Some((start, end)) = range.split_once('-') else { continue };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };

        span = Some(match span {
            Some(s) => MemoryRange { start: s.start.min(start), end: s.end.max(end) },
            None => MemoryRange { start, end },
        });
    }

    span
}
