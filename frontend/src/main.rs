use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use dc_core::core::machine::Emulator;
use dc_core::error::TerminationReason;
use dc_machines::Dreamcast;

/// Headless Dreamcast execution core runner: no window, no audio output, no
/// controller input — just boots the given ROM images and runs until the
/// emulator itself decides to stop.
#[derive(Parser)]
#[command(name = "dcemu")]
struct Args {
    /// Path to a 2 MiB boot ROM image.
    #[arg(long)]
    boot_rom: PathBuf,

    /// Path to a 128 KiB flash image.
    #[arg(long)]
    flash: PathBuf,

    /// Stop after this many host CPU cycles even if nothing else ended the run.
    #[arg(long)]
    max_cycles: Option<u64>,
}

fn main() {
    let args = Args::parse();

    let boot_rom = std::fs::read(&args.boot_rom).unwrap_or_else(|e| {
        eprintln!("Failed to read boot ROM {}: {e}", args.boot_rom.display());
        std::process::exit(1);
    });
    let flash = std::fs::read(&args.flash).unwrap_or_else(|e| {
        eprintln!("Failed to read flash image {}: {e}", args.flash.display());
        std::process::exit(1);
    });

    let mut dc = Dreamcast::new(boot_rom, flash);

    let start = Instant::now();
    let reason = loop {
        if let Some(reason) = dc.run_frame() {
            break reason;
        }
        if let Some(max) = args.max_cycles {
            let (host_cycles, _) = dc.cycle_counts();
            if host_cycles >= max {
                break TerminationReason::Normal;
            }
        }
    };

    let (host_cycles, audio_cycles) = dc.cycle_counts();
    let elapsed = start.elapsed();
    eprintln!(
        "stopped: {reason:?} ({host_cycles} host cycles, {audio_cycles} audio cycles, {:.3}s wall)",
        elapsed.as_secs_f64()
    );

    std::process::exit(match reason {
        TerminationReason::Normal | TerminationReason::Interrupted => 0,
        TerminationReason::Error(_) => 1,
    });
}
