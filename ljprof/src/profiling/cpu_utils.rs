//! CPU enumeration for per-CPU perf events.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::domain::CpuId;

const ONLINE_CPUS: &str = "/sys/devices/system/cpu/online";

/// Online CPU IDs, ascending.
///
/// # Errors
/// Returns an error if the sysfs list cannot be read or parsed
pub fn online_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string(ONLINE_CPUS).context(format!("Failed to read {ONLINE_CPUS}"))?;
    parse_cpu_list(&content)
}

/// Parses the kernel's CPU list format, e.g. `0-3,8-11` or `5`.
///
/// # Errors
/// Returns an error on malformed entries or reversed ranges
pub fn parse_cpu_list(list: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for entry in list.trim().split(',').filter(|e| !e.is_empty()) {
        let (first, last) = match entry.split_once('-') {
            Some((start, end)) => (start.parse::<u32>()?, end.parse::<u32>()?),
            None => {
                let cpu = entry.parse::<u32>()?;
                (cpu, cpu)
            }
        };
        if last < first {
            bail!("Reversed CPU range {entry}");
        }
        cpus.extend((first..=last).map(CpuId));
    }

    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numa_style_list() {
        let cpus = parse_cpu_list("0-1,4,8-9\n").unwrap();
        assert_eq!(cpus, vec![CpuId(0), CpuId(1), CpuId(4), CpuId(8), CpuId(9)]);
    }

    #[test]
    fn test_malformed_lists() {
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("a-b").is_err());
        assert!(parse_cpu_list("").unwrap().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_online_cpus() {
        let cpus = online_cpus().unwrap();
        assert!(!cpus.is_empty(), "Should have at least one CPU");
    }
}
