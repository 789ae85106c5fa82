use anyhow::{Context, Result};
use aya::maps::HashMap;
use aya::Ebpf;
use ljprof_common::{
    DIAG_ENTRY_HITS, DIAG_FRAMES_EMITTED, DIAG_GATE_ADMITTED, DIAG_GATE_FULL, DIAG_NO_STATE, DIAG_OUTPUT_FAILED,
    DIAG_SAMPLES,
};
use std::collections::BTreeMap;

/// Kernel counters in the order they are printed
pub const DIAGNOSTIC_NAMES: [(u32, &str); 7] = [
    (DIAG_SAMPLES, "samples"),
    (DIAG_GATE_ADMITTED, "gate_admitted"),
    (DIAG_GATE_FULL, "gate_full"),
    (DIAG_NO_STATE, "no_lua_state"),
    (DIAG_ENTRY_HITS, "entry_hits"),
    (DIAG_FRAMES_EMITTED, "frames_emitted"),
    (DIAG_OUTPUT_FAILED, "output_failed"),
];

/// Read the `DIAGNOSTICS` counters; counters never bumped read as 0.
///
/// # Errors
/// Returns an error if the map is missing
pub fn read_diagnostics(bpf: &Ebpf) -> Result<BTreeMap<String, u64>> {
    let map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map("DIAGNOSTICS").context("DIAGNOSTICS map not found")?)?;
    Ok(DIAGNOSTIC_NAMES
        .iter()
        .map(|&(key, name)| (name.to_string(), map.get(&key, 0).unwrap_or(0)))
        .collect())
}

/// Print the kernel counters to stderr
///
/// - `samples`: perf events seen on any CPU
/// - `gate_admitted`: first sample of a stack key, Lua stack walked
/// - `gate_full`: `COUNTS` full, sample dropped
/// - `no_lua_state`: admitted but the thread was not inside Lua
/// - `output_failed`: ring buffer full
///
/// # Errors
/// Returns an error if the diagnostic map cannot be accessed
pub fn print_diagnostics(bpf: &Ebpf) -> Result<()> {
    let counters = read_diagnostics(bpf)?;
    eprintln!("\nkernel diagnostics:");
    for (_, name) in DIAGNOSTIC_NAMES {
        eprintln!("   {name:<16} {}", counters.get(name).copied().unwrap_or(0));
    }
    if counters.get("gate_admitted").copied().unwrap_or(0) > 0 && counters.get("entry_hits") == Some(&0) {
        eprintln!("   (entry probe never fired: check --entry-symbol and --target)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_counter_named_once() {
        let mut keys: Vec<u32> = DIAGNOSTIC_NAMES.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ljprof_common::DIAG_COUNTERS as usize);
    }
}
