//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use ljprof_common::{
    DEFAULT_MAX_DEPTH, FLAG_INCLUDE_IDLE, FLAG_KERNEL_STACKS_ONLY, FLAG_USER_STACKS_ONLY, MAX_WALK_STEPS,
};
use std::path::PathBuf;

use crate::layout_config::LayoutPreset;

#[derive(Parser, Debug)]
#[command(
    name = "ljprof",
    about = "Sample LuaJIT call stacks inside OpenResty/nginx workers",
    args_conflicts_with_subcommands = true,
    after_help = "\
EXAMPLES:
    sudo ljprof --pid 1234 --duration 30 --folded out.folded
    sudo ljprof --pid 1234 --target /usr/local/openresty/luajit/lib/libluajit-5.1.so.2
    sudo ljprof --pid 1234 --layout-preset lj32 --stream
    sudo ljprof snapshot --pid 1234 --state 0x7f3a2c001380"
)]
pub struct Args {
    /// Process name to profile (auto-detects PID and binary)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Process ID to profile
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Binary or library defining the entry symbol (auto-detected if omitted)
    #[arg(short, long)]
    pub target: Option<PathBuf>,

    /// Function whose argument is the running lua_State
    #[arg(long, default_value = "lua_resume")]
    pub entry_symbol: String,

    /// Index of the lua_State argument of the entry symbol
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub state_arg: u8,

    /// Function that cancels a pending request on its thread
    #[arg(long)]
    pub cancel_symbol: Option<String>,

    /// Only sample this thread
    #[arg(long)]
    pub tid: Option<u32>,

    /// Keep samples taken while the CPU was idle
    #[arg(long)]
    pub include_idle: bool,

    /// Do not collect kernel stacks
    #[arg(long, conflicts_with = "kernel_stacks_only")]
    pub user_stacks_only: bool,

    /// Do not collect user stacks (disables Lua stacks)
    #[arg(long)]
    pub kernel_stacks_only: bool,

    /// Sampling frequency in Hz
    #[arg(short = 'F', long, default_value_t = 49)]
    pub frequency: u64,

    /// Stop after N seconds (0 = until Ctrl-C)
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// Write a report and clear sample counts every N seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub epoch: u64,

    /// Lua frames kept per stack
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH, value_parser = parse_max_depth)]
    pub max_depth: usize,

    /// Frames the kernel walker visits per sample
    #[arg(long, default_value_t = MAX_WALK_STEPS,
          value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_WALK_STEPS)))]
    pub walk_steps: u32,

    /// JSON file with interpreter offsets
    #[arg(long, value_name = "FILE", conflicts_with = "layout_preset")]
    pub layout: Option<PathBuf>,

    /// Built-in interpreter offsets
    #[arg(long, value_enum)]
    pub layout_preset: Option<LayoutPreset>,

    /// Write folded stacks (flamegraph collapse format)
    #[arg(long, value_name = "FILE")]
    pub folded: Option<PathBuf>,

    /// Write a JSON report
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Print resolved Lua frames as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Compiled eBPF object to load
    #[arg(long, value_name = "FILE")]
    pub bpf_object: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// Value of the kernel `CONFIG_FLAGS` entry
    #[must_use]
    pub fn sample_flags(&self) -> u64 {
        let mut flags = 0;
        if self.user_stacks_only {
            flags |= FLAG_USER_STACKS_ONLY;
        }
        if self.kernel_stacks_only {
            flags |= FLAG_KERNEL_STACKS_ONLY;
        }
        if self.include_idle {
            flags |= FLAG_INCLUDE_IDLE;
        }
        flags
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk a lua_State from userspace through /proc/<pid>/mem
    Snapshot(SnapshotArgs),
}

#[derive(ClapArgs, Debug)]
pub struct SnapshotArgs {
    /// Process that owns the lua_State
    #[arg(short, long)]
    pub pid: i32,

    /// Address of the lua_State (hex with 0x, or decimal)
    #[arg(long, value_parser = parse_address)]
    pub state: u64,

    /// Number of times to read the stack
    #[arg(long, default_value_t = 100)]
    pub samples: u32,

    /// Pause between reads
    #[arg(long, default_value_t = 10)]
    pub interval_ms: u64,

    /// Frames visited per read
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub walk_steps: u32,

    /// Lua frames kept per stack
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH, value_parser = parse_max_depth)]
    pub max_depth: usize,

    /// JSON file with interpreter offsets
    #[arg(long, value_name = "FILE", conflicts_with = "layout_preset")]
    pub layout: Option<PathBuf>,

    /// Built-in interpreter offsets
    #[arg(long, value_enum)]
    pub layout_preset: Option<LayoutPreset>,
}

/// Parses `0x`-prefixed hex or plain decimal addresses.
///
/// # Errors
/// Returns a message for clap when the text is not a number
pub fn parse_address(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{text}': {e}"))
}

/// Parses a backtrace capacity; a zero capacity would reject every frame.
///
/// # Errors
/// Returns a message for clap when the text is not a positive number
pub fn parse_max_depth(text: &str) -> Result<usize, String> {
    match text.trim().parse::<usize>() {
        Ok(0) => Err("max depth must be at least 1".to_string()),
        Ok(depth) => Ok(depth),
        Err(e) => Err(format!("invalid depth '{text}': {e}")),
    }
}
