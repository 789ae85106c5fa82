//! Pre-flight checks for ljprof
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use object::{Object, ObjectSection};
use std::path::Path;

use crate::process_lookup::binary_defines;

/// Ring buffers and `bpf_get_stackid` on perf events need 5.8
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading.
///
/// `probe_binary` is the file the entry uprobe attaches to (the nginx
/// executable or the LuaJIT shared library).
pub fn run_preflight_checks(probe_binary: &Path, entry_symbol: &str, quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_binary_exists(probe_binary)?;
    check_entry_symbol(probe_binary, entry_symbol)?;
    check_debug_symbols(probe_binary, quiet)?;
    Ok(())
}

fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: ljprof requires root privileges to load eBPF programs\n\
         and read the target's memory.\n\n\
         Run with: sudo ljprof ..."
    );
}

fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             ljprof requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// `(major, minor)` of a kernel release string such as `5.15.0-91-generic`.
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor_digits: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor_digits.parse().ok()?))
}

fn check_binary_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Make sure the path is correct and the binary exists.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --target must point to an ELF file, not a directory.",
            path.display()
        );
    }
    Ok(())
}

/// The uprobe needs the entry function in the symbol tables
fn check_entry_symbol(path: &Path, symbol: &str) -> Result<()> {
    if !binary_defines(path, symbol) {
        bail!(
            "Symbol '{symbol}' not found in {}.\n\n\
             Point --target at the binary or library that defines it\n\
             (e.g. libluajit-5.1.so), or choose another --entry-symbol.",
            path.display()
        );
    }
    Ok(())
}

/// Warn when native frames will be unsymbolized
fn check_debug_symbols(path: &Path, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }

    let file_data =
        std::fs::read(path).with_context(|| format!("Failed to read binary: {}", path.display()))?;

    let Ok(obj) = object::File::parse(&*file_data) else {
        return Ok(());
    };

    let has_debug_info = obj.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);
    let has_symtab = obj.section_by_name(".symtab").is_some_and(|s| s.size() > 0);

    if !has_debug_info && !has_symtab {
        eprintln!("warning: binary stripped, native frames will show addresses only");
    } else if !has_debug_info {
        eprintln!("warning: no DWARF debug info, inlined native frames unavailable");
    }

    Ok(())
}

/// Check if the target process exists
pub fn check_process_exists(pid: i32) -> Result<()> {
    if !Path::new(&format!("/proc/{pid}")).exists() {
        bail!(
            "Process {pid} not found.\n\n\
             Is the process still running? Check with: ps -p {pid}"
        );
    }
    Ok(())
}

/// Check that the target's memory maps are readable
pub fn check_proc_access(pid: i32) -> Result<()> {
    let maps_path = format!("/proc/{pid}/maps");
    std::fs::read_to_string(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {pid})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted"
        )
    })?;
    Ok(())
}
