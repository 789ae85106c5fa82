use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build ljprof-ebpf; ljprof loads the object at runtime
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Read the sampled IP with the arm64 `pt_regs` layout
        #[arg(long)]
        aarch64: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, aarch64 } => build_ebpf(&target, aarch64)?,
    }

    Ok(())
}

fn build_ebpf(target: &str, aarch64: bool) -> Result<()> {
    // Debug builds pull in formatting code (LowerHex) the BPF linker rejects
    let mut cmd = Command::new("cargo");
    cmd.args(["+nightly", "build", "--package", "ljprof-ebpf", "--target", target])
        .args(["-Z", "build-std=core", "--release"]);
    if aarch64 {
        cmd.args(["--features", "aarch64"]);
    }

    let status = cmd.status().context("Failed to run cargo for ljprof-ebpf")?;
    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    println!("eBPF object: target/{target}/release/ljprof");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ebpf_invocation() {
        let args = Args::try_parse_from(["xtask", "build-ebpf"]).unwrap();
        let Cmd::BuildEbpf { target, aarch64 } = args.command;
        assert_eq!(target, "bpfel-unknown-none");
        assert!(!aarch64);

        // Release mode is implied
        assert!(Args::try_parse_from(["xtask", "build-ebpf", "--release"]).is_err());
        assert!(Args::try_parse_from(["xtask", "build-ebpf", "--aarch64"]).is_ok());
    }
}
