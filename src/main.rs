//! `lockprobe`: runs the spin-lock rendezvous probe on two threads.
//!
//! A renderer thread that never blocks and a controller thread on a 10ms
//! timer walk the lock through its checks. Exits non-zero if any check fails.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use axiom_lockprobe::{Harness, ProbeConfig};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockprobe", version, about)]
struct Cli {
    /// Spin timeout that must elapse while the lock stays held (ms).
    #[arg(long, default_value_t = 100)]
    wait_fail_ms: u64,
    /// Spin timeout during which the controller releases the lock (ms).
    #[arg(long, default_value_t = 1000)]
    wait_acquire_ms: u64,
    /// Controller tick period (ms).
    #[arg(long, default_value_t = 10)]
    controller_period_ms: u64,
    /// Renderer invocation period (us). 0 runs back to back.
    #[arg(long, default_value_t = 2667)]
    quantum_us: u64,
    /// Number of full sequences to run.
    #[arg(short, long, default_value_t = 1)]
    cycles: u32,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> ProbeConfig {
        ProbeConfig::default()
            .with_wait_fail_timeout(Duration::from_millis(self.wait_fail_ms))
            .with_wait_acquire_timeout(Duration::from_millis(self.wait_acquire_ms))
            .with_controller_period(Duration::from_millis(self.controller_period_ms))
            .with_render_quantum(Duration::from_micros(self.quantum_us))
            .with_cycles(self.cycles)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let harness = Harness::new(cli.config())?;
    let Some(run) = harness.begin()? else {
        anyhow::bail!("a probe run is already active");
    };
    let report = run.join();

    match report.error() {
        None => {
            info!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Some(error) => {
            error!(%error, "{report}");
            Ok(ExitCode::FAILURE)
        }
    }
}
