//! # ljprof - Main Entry Point
//!
//! Supports two operational modes:
//! - **Profile** (`--pid <PID>` or `ljprof <PROCESS>`): eBPF sampling of native
//!   and Lua stacks, reported as folded stacks and/or JSON
//! - **Snapshot** (`ljprof snapshot --pid <PID> --state <ADDR>`): userspace
//!   walk of one `lua_State` through `/proc/<pid>/mem`

// Main function is intentionally long for clarity
#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use aya::maps::RingBuf;
use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ljprof::aggregator::StackAggregator;
use ljprof::cli::{Args, Command, SnapshotArgs};
use ljprof::domain::Pid;
use ljprof::export::{write_folded, write_json, JsonReport, SampleRecord};
use ljprof::layout_config::LayoutConfig;
use ljprof::memory::ProcessMemory;
use ljprof::preflight::{check_proc_access, check_process_exists, run_preflight_checks};
use ljprof::process_lookup::{find_process_by_name, locate_symbol_binary, resolve_exe_path};
use ljprof::profiling::{
    attach_lua_probes, clear_counts, collect_samples, configure, default_bpf_object, display_frame_event,
    display_progress, display_statistics, init_ebpf_logger, load_ebpf_program, print_diagnostics,
    read_diagnostics, start_perf_sampling, EventProcessor, SamplingConfig, SnapshotSampler, StackResolver,
};
use ljprof::symbolization::{parse_memory_maps, Symbolizer};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Streamed frames buffered for the printer thread
const STREAM_CAPACITY: usize = 4096;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("cannot use process argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Target of a profiling run
struct Target {
    pid: i32,
    /// Executable of the process, symbolized for native frames
    exe: PathBuf,
    /// File the Lua probes attach to
    probe_binary: PathBuf,
}

/// Resolve PID, executable and probe binary from CLI arguments.
///
/// - `ljprof nginx` - find process by name
/// - `ljprof --pid 1234` - explicit PID, probe binary located by symbol
/// - `ljprof --pid 1234 --target /path/libluajit-5.1.so` - explicit probe binary
fn resolve_target(args: &Args) -> Result<Target> {
    let (pid, exe) = if let Some(ref name) = args.process {
        if args.pid.is_some() {
            anyhow::bail!(
                "Cannot use PROCESS argument with --pid.\n\n\
                 Use either:\n  \
                 ljprof nginx            (auto-detect)\n  \
                 ljprof --pid 1234       (explicit PID)"
            );
        }
        let info = find_process_by_name(name)?;
        (info.pid, info.exe_path)
    } else if let Some(pid) = args.pid {
        (pid, resolve_exe_path(pid)?)
    } else {
        anyhow::bail!(
            "Missing required argument: PROCESS or --pid\n\n\
             Usage:\n  \
             ljprof nginx            Auto-detect PID and binary\n  \
             ljprof --pid 1234       Explicit PID\n\n\
             Run 'ljprof --help' for more options"
        );
    };

    let probe_binary = match args.target {
        Some(ref t) => std::fs::canonicalize(t).with_context(|| format!("Failed to resolve path: {}", t.display()))?,
        None => locate_symbol_binary(pid, &exe, &args.entry_symbol)?,
    };

    Ok(Target { pid, exe, probe_binary })
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Snapshot(ref snapshot)) = args.command {
        return run_snapshot(snapshot);
    }

    let quiet = args.quiet;
    let target = resolve_target(&args)?;
    let pid = target.pid;

    run_preflight_checks(&target.probe_binary, &args.entry_symbol, quiet)?;
    check_process_exists(pid)?;
    check_proc_access(pid)?;

    let layout = LayoutConfig::select(args.layout.as_deref(), args.layout_preset)?.to_frame_layout();

    if !quiet {
        println!("ljprof v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {pid}");
        println!("probe: {} @ {}", args.entry_symbol, target.probe_binary.display());
    }

    // ── Load eBPF, configure, attach ────────────────────────────────────
    let bpf_object = args.bpf_object.clone().unwrap_or_else(default_bpf_object);
    let mut bpf = load_ebpf_program(&bpf_object)?;
    init_ebpf_logger(&mut bpf);

    let config = SamplingConfig {
        pid: u32::try_from(pid).context("invalid pid")?,
        tid: args.tid.unwrap_or(0),
        flags: args.sample_flags(),
        walk_steps: args.walk_steps,
        state_arg: args.state_arg,
    };
    configure(&mut bpf, &config, &layout)?;
    attach_lua_probes(&mut bpf, &target.probe_binary, pid, &args.entry_symbol, args.cancel_symbol.as_deref())?;
    let cpus = start_perf_sampling(&mut bpf, args.frequency)?;

    if !quiet {
        println!("sampling: {} Hz on {cpus} CPUs", args.frequency);
    }

    let mut ring_buf = RingBuf::try_from(bpf.take_map("EVENTS").context("EVENTS map not found")?)?;

    // ── Native symbolization ────────────────────────────────────────────
    let exe_str = target.exe.to_string_lossy().into_owned();
    let memory_range = match parse_memory_maps(pid, &exe_str) {
        Ok(range) => {
            info!("Found memory range: 0x{:x} - 0x{:x}", range.start, range.end);
            Some(range)
        }
        Err(e) => {
            warn!("Failed to get memory range: {e}. Native frames may be unsymbolized.");
            None
        }
    };
    let symbolizer = match Symbolizer::new(&target.exe) {
        Ok(symbolizer) => Some(symbolizer),
        Err(e) => {
            warn!("Native symbolization unavailable: {e}");
            None
        }
    };
    let stack_resolver = StackResolver::new(symbolizer.as_ref(), memory_range);

    // ── Event processing ────────────────────────────────────────────────
    let aggregator = StackAggregator::new(args.max_depth);

    let (stream_handle, stream_tx) = if args.stream {
        let (tx, rx) = bounded(STREAM_CAPACITY);
        let handle = std::thread::spawn(move || {
            for event in rx {
                display_frame_event(&event);
            }
        });
        (Some(handle), Some(tx))
    } else {
        (None, None)
    };

    let mut processor = EventProcessor::new(&aggregator, stream_tx);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let profiling_start = Instant::now();
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let epoch_length = (args.epoch > 0).then(|| Duration::from_secs(args.epoch));
    let mut epoch_start = Instant::now();
    let mut epoch = 0u64;
    let mut last_status_time = Instant::now();
    let proc_path = format!("/proc/{pid}");
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if profiling_start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if !Path::new(&proc_path).exists() {
            exit_reason = "process exited";
            break;
        }

        while let Some(item) = ring_buf.next() {
            processor.process_bytes(&item);
        }

        if let Some(length) = epoch_length {
            if epoch_start.elapsed() >= length {
                let records = collect_samples(&bpf, &aggregator, &stack_resolver)?;
                write_reports(&args, &bpf, pid, args.epoch, &records, Some(epoch))?;
                clear_counts(&mut bpf)?;
                epoch += 1;
                epoch_start = Instant::now();
            }
        }

        if last_status_time.elapsed() > Duration::from_secs(10) {
            if processor.stats.events == 0 {
                info!("Still waiting for Lua frames... (is the entry symbol being called?)");
            }
            if !quiet {
                if let Some(limit) = duration_limit {
                    let elapsed = profiling_start.elapsed().as_secs();
                    display_progress(elapsed, limit.as_secs(), limit.as_secs().saturating_sub(elapsed));
                }
            }
            last_status_time = Instant::now();
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // Frames emitted right before shutdown
    while let Some(item) = ring_buf.next() {
        processor.process_bytes(&item);
    }
    let stats = processor.stats;
    drop(processor);
    if let Some(handle) = stream_handle {
        handle.join().ok();
    }

    let elapsed = profiling_start.elapsed();
    let records = collect_samples(&bpf, &aggregator, &stack_resolver)?;
    let final_epoch = epoch_length.map(|_| epoch);
    write_reports(&args, &bpf, pid, elapsed.as_secs(), &records, final_epoch)?;

    if !quiet {
        eprintln!("\n{exit_reason}: {:.1}s, {} stacks", elapsed.as_secs_f64(), records.len());
        display_statistics(&stats, aggregator.len());
        print_diagnostics(&bpf)?;
    }

    Ok(())
}

/// Write folded and JSON reports; folded stacks go to stdout when no
/// output file was requested. Epoch reports get the epoch number appended
/// to each file name.
fn write_reports(
    args: &Args,
    bpf: &aya::Ebpf,
    pid: i32,
    duration_secs: u64,
    records: &[SampleRecord],
    epoch: Option<u64>,
) -> Result<()> {
    let output_path = |path: &Path| epoch.map_or_else(|| path.to_path_buf(), |n| epoch_path(path, n));

    if let Some(ref path) = args.folded {
        let path = output_path(path);
        let mut writer = BufWriter::new(File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?);
        write_folded(&mut writer, records).context("Failed to write folded stacks")?;
        if !args.quiet {
            println!("saved: {}", path.display());
        }
    }

    if let Some(ref path) = args.json {
        let path = output_path(path);
        let diagnostics = read_diagnostics(bpf).unwrap_or_default();
        let report = JsonReport::new(pid, duration_secs, records.to_vec()).with_diagnostics(diagnostics);
        let mut writer = BufWriter::new(File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?);
        write_json(&mut writer, &report).context("Failed to write JSON report")?;
        if !args.quiet {
            println!("saved: {}", path.display());
        }
    }

    if args.folded.is_none() && args.json.is_none() {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        write_folded(&mut lock, records)?;
        lock.flush()?;
    }
    Ok(())
}

/// `out.folded` → `out.folded.3`
fn epoch_path(path: &Path, epoch: u64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{epoch}"));
    PathBuf::from(name)
}

/// `ljprof snapshot`: walk a `lua_State` from userspace
fn run_snapshot(args: &SnapshotArgs) -> Result<()> {
    check_process_exists(args.pid)?;
    let layout = LayoutConfig::select(args.layout.as_deref(), args.layout_preset)?.to_frame_layout();
    let pid = Pid(u32::try_from(args.pid).context("invalid pid")?);
    let memory = ProcessMemory::open(pid)?;
    let comm = std::fs::read_to_string(format!("/proc/{}/comm", args.pid)).unwrap_or_default();

    let mut sampler = SnapshotSampler::new(memory, layout, args.state, args.walk_steps, args.max_depth)
        .with_process(pid.0, comm.trim());
    sampler.run(args.samples, Duration::from_millis(args.interval_ms))?;

    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_folded(&mut lock, &sampler.records())?;
    lock.flush()?;

    let stats = sampler.stats;
    eprintln!(
        "snapshot: reads={} unreadable={} outside_lua={} stacks={} depth_exceeded={}",
        stats.reads, stats.unreadable, stats.empty, stats.resolved, stats.depth_exceeded
    );
    Ok(())
}
