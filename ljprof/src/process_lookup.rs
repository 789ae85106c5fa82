//! Locate the target process and the binary that holds the Lua entry symbol.
//!
//! OpenResty usually links LuaJIT as a shared library, so the function the
//! entry probe attaches to may live in `libluajit-5.1.so` rather than in the
//! nginx executable. [`locate_symbol_binary`] searches the executable first
//! and then every file-backed mapping of the process.

use anyhow::{bail, Context, Result};
use object::{Object, ObjectSymbol};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of process lookup.
#[derive(Debug)]
pub struct ProcessInfo {
    pub pid: i32,
    pub exe_path: PathBuf,
    pub command: String,
    /// Full command line, which tells nginx master and worker apart
    pub cmdline: String,
}

/// Find a process by name.
///
/// Matches against the command name from `/proc/<pid>/stat` and the
/// executable basename from `/proc/<pid>/exe`.
///
/// # Errors
/// - No processes found
/// - Multiple processes found (ambiguous); the error lists them with their
///   command lines so a single worker can be picked with `--pid`
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let mut matches: Vec<ProcessInfo> = Vec::new();

    for entry in fs::read_dir("/proc").context("Failed to read /proc")?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };

        // Kernel threads and inaccessible processes have no readable exe
        let Ok(exe_path) = fs::read_link(format!("/proc/{pid}/exe")) else {
            continue;
        };
        let Some(command) = fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| extract_comm(&stat))
        else {
            continue;
        };

        if is_match(&command, &exe_path, name) {
            let cmdline = fs::read(format!("/proc/{pid}/cmdline"))
                .map(|raw| render_cmdline(&raw))
                .unwrap_or_default();
            matches.push(ProcessInfo { pid, exe_path, command, cmdline });
        }
    }

    match matches.len() {
        0 => bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        ),
        1 => Ok(matches.remove(0)),
        _ => {
            let list: Vec<String> =
                matches.iter().map(|m| format!("  {} ({})", m.pid, m.cmdline)).collect();
            bail!(
                "Multiple processes match '{name}':\n{}\n\n\
                 Pick one worker explicitly: ljprof --pid <PID>",
                list.join("\n")
            )
        }
    }
}

/// Resolve binary path from PID via `/proc/<pid>/exe`.
///
/// # Errors
/// Returns error if the process doesn't exist or `/proc/<pid>/exe` is not readable.
pub fn resolve_exe_path(pid: i32) -> Result<PathBuf> {
    let exe_link = format!("/proc/{pid}/exe");
    fs::read_link(&exe_link).with_context(|| format!("Cannot read {exe_link}"))
}

/// First of `exe` and the process's mapped files that defines `symbol`.
///
/// # Errors
/// Returns an error if no candidate defines the symbol
pub fn locate_symbol_binary(pid: i32, exe: &Path, symbol: &str) -> Result<PathBuf> {
    if binary_defines(exe, symbol) {
        return Ok(exe.to_path_buf());
    }

    let maps = fs::read_to_string(format!("/proc/{pid}/maps"))
        .with_context(|| format!("Failed to read /proc/{pid}/maps"))?;
    for path in mapped_files(&maps) {
        // Mapped paths are as seen by the target; go through its root
        let via_root = PathBuf::from(format!("/proc/{pid}/root{}", path.display()));
        if binary_defines(&via_root, symbol) {
            return Ok(via_root);
        }
    }

    bail!(
        "Symbol '{symbol}' not found in {} or any library it maps.\n\
         Pass the binary explicitly with --target",
        exe.display()
    )
}

/// True when the ELF file at `path` defines `symbol` (static or dynamic table).
pub fn binary_defines(path: &Path, symbol: &str) -> bool {
    let Ok(data) = fs::read(path) else { return false };
    let Ok(obj) = object::File::parse(&*data) else { return false };
    obj.symbols()
        .chain(obj.dynamic_symbols())
        .any(|sym| sym.is_definition() && sym.name() == Ok(symbol))
}

/// Distinct file-backed mappings, in map order.
fn mapped_files(maps: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for line in maps.lines() {
        let Some(path) = line.split_whitespace().nth(5) else { continue };
        if !path.starts_with('/') {
            continue;
        }
        let path = PathBuf::from(path);
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Option<String> {
    let open = stat_line.find('(')?;
    let close = stat_line.rfind(')')?;
    (open < close).then(|| stat_line[open + 1..close].to_string())
}

/// NUL-separated argv as one space-separated line.
fn render_cmdline(raw: &[u8]) -> String {
    raw.split(|&b| b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check if process matches the search pattern.
fn is_match(command: &str, exe_path: &Path, pattern: &str) -> bool {
    let exe_basename = exe_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let pattern_basename = Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    command == pattern_basename
        || exe_basename == pattern_basename
        || command.contains(pattern)
        || exe_basename.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_comm_with_parens() {
        assert_eq!(extract_comm("1234 (nginx) S 1 1234").as_deref(), Some("nginx"));
        assert_eq!(extract_comm("1234 (app (v2)) S 1 1234").as_deref(), Some("app (v2)"));
        assert_eq!(extract_comm("garbage"), None);
    }

    #[test]
    fn test_render_cmdline() {
        assert_eq!(render_cmdline(b"nginx: worker process\0\0"), "nginx: worker process");
        assert_eq!(render_cmdline(b"/usr/bin/resty\0-e\0print(1)\0"), "/usr/bin/resty -e print(1)");
    }

    #[test]
    fn test_is_match() {
        let exe = Path::new("/usr/local/openresty/nginx/sbin/nginx");
        assert!(is_match("nginx", exe, "nginx"));
        assert!(is_match("nginx", exe, "/usr/local/openresty/nginx/sbin/nginx"));
        assert!(!is_match("nginx", exe, "redis"));
    }

    #[test]
    fn test_mapped_files_are_distinct() {
        let maps = "\
5600-5700 r--p 00000000 08:01 11 /usr/sbin/nginx
5700-5800 r-xp 00001000 08:01 11 /usr/sbin/nginx
7f00-7f10 r-xp 00000000 08:01 12 /usr/lib/libluajit-5.1.so.2
7f10-7f20 rw-p 00000000 00:00 0
7ffe-7fff rw-p 00000000 00:00 0 [stack]
";
        assert_eq!(
            mapped_files(maps),
            vec![PathBuf::from("/usr/sbin/nginx"), PathBuf::from("/usr/lib/libluajit-5.1.so.2")]
        );
    }

    #[test]
    fn test_missing_binary_defines_nothing() {
        assert!(!binary_defines(Path::new("/nonexistent/libluajit.so"), "lua_resume"));
    }
}
