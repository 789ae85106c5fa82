//! # eBPF Program Loading and Attachment
//!
//! Loads the compiled eBPF object, pushes configuration into its maps and
//! attaches programs to their hook points.
//!
//! ## Attachment Points
//!
//! - **Uprobe**: entry symbol (`lua_resume`), records the running `lua_State`
//! - **Uretprobe**: same symbol, clears the record on return
//! - **Uprobe** (optional): cancel symbol, clears the record
//! - **Perf Event**: CPU clock sampling on every online CPU

use anyhow::{Context, Result};
use aya::{
    maps::{Array, HashMap},
    programs::{perf_event, PerfEvent, UProbe},
    Ebpf,
};
use aya_log::EbpfLogger;
use ljprof_common::{
    FrameLayout, CONFIG_FLAGS, CONFIG_STATE_ARG, CONFIG_TARGET_PID, CONFIG_TARGET_TID, CONFIG_WALK_STEPS,
};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::domain::ProfilerError;
use crate::profiling::online_cpus;

/// Where `cargo xtask build-ebpf` leaves the object.
#[must_use]
pub fn default_bpf_object() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../target/bpfel-unknown-none/release/ljprof")
}

/// Load the eBPF object from `path`.
///
/// The object is always built in release mode; debug builds pull in
/// formatting code the verifier rejects.
///
/// # Errors
/// Returns an error if the object is missing or the kernel rejects it
pub fn load_ebpf_program(path: &Path) -> Result<Ebpf> {
    let bpf = Ebpf::load_file(path)
        .map_err(|e| ProfilerError::EbpfLoadFailed(format!("{}: {e}", path.display())))
        .context("Build the eBPF object with: cargo xtask build-ebpf")?;
    info!("Loaded eBPF object {}", path.display());
    Ok(bpf)
}

/// Forward kernel-side `aya-log` records to the `log` facade
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Values written to the kernel `CONFIG` map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    pub pid: u32,
    /// 0 samples every thread
    pub tid: u32,
    pub flags: u64,
    pub walk_steps: u32,
    pub state_arg: u8,
}

impl SamplingConfig {
    fn entries(&self) -> [(u32, u64); 5] {
        [
            (CONFIG_TARGET_PID, u64::from(self.pid)),
            (CONFIG_TARGET_TID, u64::from(self.tid)),
            (CONFIG_FLAGS, self.flags),
            (CONFIG_WALK_STEPS, u64::from(self.walk_steps)),
            (CONFIG_STATE_ARG, u64::from(self.state_arg)),
        ]
    }
}

/// Write `config` into `CONFIG` and `layout` into `LAYOUT`.
///
/// # Errors
/// Returns an error if either map is missing or an update fails
pub fn configure(bpf: &mut Ebpf, config: &SamplingConfig, layout: &FrameLayout) -> Result<()> {
    let mut config_map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut("CONFIG").ok_or(ProfilerError::MapNotFound("CONFIG"))?)?;
    for (key, value) in config.entries() {
        config_map.insert(key, value, 0)?;
    }
    info!("Target PID {} (tid filter {}), walk steps {}", config.pid, config.tid, config.walk_steps);

    let mut layout_map: Array<_, FrameLayout> =
        Array::try_from(bpf.map_mut("LAYOUT").ok_or(ProfilerError::MapNotFound("LAYOUT"))?)?;
    layout_map.set(0, *layout, 0)?;
    info!("Pushed interpreter layout (slot {} bytes, ref {} bytes)", layout.slot_size, layout.ref_size);
    Ok(())
}

/// Attach the entry, exit and optional cancel probes.
///
/// The cancel probe is best effort: a missing symbol only loses early
/// clearing of pending records.
///
/// # Errors
/// Returns an error if the entry or exit probe cannot be attached
pub fn attach_lua_probes(
    bpf: &mut Ebpf,
    target: &Path,
    pid: i32,
    entry_symbol: &str,
    cancel_symbol: Option<&str>,
) -> Result<()> {
    attach_uprobe(bpf, "lua_entry_hook", entry_symbol, target, pid)?;
    attach_uprobe(bpf, "lua_exit_hook", entry_symbol, target, pid)?;

    if let Some(symbol) = cancel_symbol {
        if let Err(e) = attach_uprobe(bpf, "lua_cancel_hook", symbol, target, pid) {
            warn!("Cancel probe unavailable: {e}");
        }
    }
    Ok(())
}

fn attach_uprobe(bpf: &mut Ebpf, program: &str, symbol: &str, target: &Path, pid: i32) -> Result<(), ProfilerError> {
    let failed = |error: String| ProfilerError::ProbeAttachFailed {
        probe: format!("{program}@{symbol}"),
        binary: target.display().to_string(),
        error,
    };

    let probe: &mut UProbe = bpf
        .program_mut(program)
        .ok_or_else(|| failed("program not found in object".to_string()))?
        .try_into()
        .map_err(|e: aya::programs::ProgramError| failed(e.to_string()))?;
    probe.load().map_err(|e| failed(e.to_string()))?;
    probe.attach(Some(symbol), 0, target, Some(pid)).map_err(|e| failed(e.to_string()))?;
    info!("Attached {program} to {symbol} in {}", target.display());
    Ok(())
}

/// Attach the CPU sampler to every online CPU at `frequency` Hz.
/// Returns the number of CPUs.
///
/// # Errors
/// Returns an error if the program is missing or attaching fails
pub fn start_perf_sampling(bpf: &mut Ebpf, frequency: u64) -> Result<usize> {
    let program: &mut PerfEvent =
        bpf.program_mut("on_cpu_sample").context("on_cpu_sample program not found")?.try_into()?;
    program.load()?;

    let cpus = online_cpus()?;
    for cpu in &cpus {
        program.attach(
            perf_event::PerfTypeId::Software,
            perf_event::perf_sw_ids::PERF_COUNT_SW_CPU_CLOCK as u64,
            perf_event::PerfEventScope::AllProcessesOneCpu { cpu: cpu.0 },
            perf_event::SamplePolicy::Frequency(frequency),
            false,
        )?;
    }
    info!("Attached perf_event sampler to {} CPUs at {frequency} Hz", cpus.len());
    Ok(cpus.len())
}
