//! Native stack trace resolution
//!
//! Turns the user and kernel stacks recorded in `STACK_TRACES` into frame
//! labels for the folded report. User frames inside the target binary are
//! symbolized; frames in shared libraries and the kernel are shown as
//! addresses.

use aya::maps::{MapData, StackTraceMap};
use log::debug;
use std::borrow::Borrow;

use crate::domain::StackId;
use crate::symbolization::{MemoryRange, Symbolizer};

/// Resolves native stacks of one target binary
pub struct StackResolver<'a> {
    symbolizer: Option<&'a Symbolizer>,
    memory_range: Option<MemoryRange>,
}

impl<'a> StackResolver<'a> {
    pub fn new(symbolizer: Option<&'a Symbolizer>, memory_range: Option<MemoryRange>) -> Self {
        Self { symbolizer, memory_range }
    }

    /// Instruction pointers of `stack_id`, innermost first. Empty when the
    /// id is invalid or no longer in the map.
    pub fn stack_ips<T: Borrow<MapData>>(
        stack_id: StackId,
        stack_traces: &StackTraceMap<T>,
    ) -> Vec<u64> {
        let Some(key) = stack_id.as_map_key() else {
            return Vec::new();
        };
        match stack_traces.get(&key, 0) {
            Ok(trace) => trace.frames().iter().map(|f| f.ip).take_while(|&ip| ip != 0).collect(),
            Err(e) => {
                debug!("{stack_id} unavailable: {e}");
                Vec::new()
            }
        }
    }

    /// Labels of a user stack, outermost first.
    pub fn user_frames<T: Borrow<MapData>>(
        &self,
        stack_id: StackId,
        stack_traces: &StackTraceMap<T>,
    ) -> Vec<String> {
        self.label_user_ips(&Self::stack_ips(stack_id, stack_traces))
    }

    /// Labels of a kernel stack, outermost first. `kernel_ip` (the sampled
    /// instruction, 0 if none) becomes the innermost frame.
    pub fn kernel_frames<T: Borrow<MapData>>(
        stack_id: StackId,
        stack_traces: &StackTraceMap<T>,
        kernel_ip: u64,
    ) -> Vec<String> {
        let ips = with_sampled_ip(Self::stack_ips(stack_id, stack_traces), kernel_ip);
        label_kernel_ips(&ips)
    }

    /// Symbolizes innermost-first `ips` into outermost-first labels.
    pub fn label_user_ips(&self, ips: &[u64]) -> Vec<String> {
        let mut labels = Vec::with_capacity(ips.len());
        for &ip in ips.iter().rev() {
            match (self.symbolizer, self.rebase(ip)) {
                (Some(symbolizer), Some(lookup)) => {
                    labels.extend(symbolizer.resolve(lookup).names_outer_first());
                }
                _ => labels.push(format!("0x{ip:x}")),
            }
        }
        labels
    }

    /// Address to look up for `ip`, `None` when it is outside the target
    /// binary.
    fn rebase(&self, ip: u64) -> Option<u64> {
        let pie = self.symbolizer.is_some_and(Symbolizer::is_position_independent);
        rebase_address(ip, self.memory_range, pie)
    }
}

/// Maps a runtime address to the address the binary's symbols use.
///
/// Without range information every address is assumed to belong to the
/// binary and is looked up unchanged.
#[must_use]
pub fn rebase_address(addr: u64, range: Option<MemoryRange>, position_independent: bool) -> Option<u64> {
    match range {
        Some(range) if !range.contains(addr) => None,
        Some(range) if position_independent => Some(addr - range.start),
        _ => Some(addr),
    }
}

/// Puts the sampled kernel instruction back on top of innermost-first
/// `ips`. Frame-pointer unwinding starts at the caller, so the sampled
/// function is missing unless the stack already begins with it. A zero
/// `kernel_ip` means the sample was not taken in the kernel.
#[must_use]
pub fn with_sampled_ip(mut ips: Vec<u64>, kernel_ip: u64) -> Vec<u64> {
    if kernel_ip != 0 && ips.first() != Some(&kernel_ip) {
        ips.insert(0, kernel_ip);
    }
    ips
}

/// Kernel frame labels, outermost first.
#[must_use]
pub fn label_kernel_ips(ips: &[u64]) -> Vec<String> {
    ips.iter().rev().map(|ip| format!("[k] 0x{ip:x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: MemoryRange = MemoryRange { start: 0x7f00_0000_0000, end: 0x7f00_0010_0000 };

    #[test]
    fn test_rebase_pie() {
        assert_eq!(rebase_address(0x7f00_0005_0000, Some(RANGE), true), Some(0x5_0000));
    }

    #[test]
    fn test_rebase_non_pie_keeps_address() {
        assert_eq!(rebase_address(0x7f00_0005_0000, Some(RANGE), false), Some(0x7f00_0005_0000));
    }

    #[test]
    fn test_rebase_shared_library() {
        assert_eq!(rebase_address(0x7f00_0100_0000, Some(RANGE), true), None);
    }

    #[test]
    fn test_rebase_no_range() {
        assert_eq!(rebase_address(0x1234_5678, None, true), Some(0x1234_5678));
    }

    #[test]
    fn test_unsymbolized_labels_are_outermost_first() {
        let resolver = StackResolver::new(None, Some(RANGE));
        let labels = resolver.label_user_ips(&[0x10, 0x20]);
        assert_eq!(labels, vec!["0x20", "0x10"]);
        assert_eq!(label_kernel_ips(&[0xffff_1, 0xffff_2]), vec!["[k] 0xffff2", "[k] 0xffff1"]);
    }

    #[test]
    fn test_sampled_ip_becomes_innermost_kernel_frame() {
        let ips = with_sampled_ip(vec![0xffff_ffff_8100_2000, 0xffff_ffff_8100_3000], 0xffff_ffff_8100_1000);
        assert_eq!(ips, vec![0xffff_ffff_8100_1000, 0xffff_ffff_8100_2000, 0xffff_ffff_8100_3000]);
        assert_eq!(label_kernel_ips(&ips).last().map(String::as_str), Some("[k] 0xffffffff81001000"));
    }

    #[test]
    fn test_sampled_ip_already_on_top_is_not_repeated() {
        let ips = with_sampled_ip(vec![0xffff_ffff_8100_1000, 0xffff_ffff_8100_2000], 0xffff_ffff_8100_1000);
        assert_eq!(ips, vec![0xffff_ffff_8100_1000, 0xffff_ffff_8100_2000]);
    }

    #[test]
    fn test_user_space_sample_leaves_kernel_stack_alone() {
        assert_eq!(with_sampled_ip(vec![0xffff_ffff_8100_2000], 0), vec![0xffff_ffff_8100_2000]);
        // A stack id that no longer resolves still shows the sampled ip
        assert_eq!(with_sampled_ip(Vec::new(), 0xffff_ffff_8100_1000), vec![0xffff_ffff_8100_1000]);
    }
}
