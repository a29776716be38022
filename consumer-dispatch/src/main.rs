// SPDX-License-Identifier: MIT
// consumer-dispatch: drives the asynchronous consumer scheduler with a synthetic workload
//
// - Builds a coordinator with one schedule queue per delivery thread.
// - Feeds it a workload from producer threads and reports how it was scheduled.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use anyhow::Context;
use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use clap::Parser;
use consumer_dispatch::config::DEFAULT_MAX_THREADS;
use consumer_dispatch::workload::run_workload::run_workload;
use consumer_dispatch::workload::workload::Workload;
use consumer_dispatch::{Coordinator, DispatchConfig, IncidentSink};
use consumer_dispatch::Diagnostics;
use log::{info, warn};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Maximum number of concurrent delivery threads
    #[arg(long, default_value_t = DEFAULT_MAX_THREADS)]
    max_threads: usize,

    /// How long a drained queue keeps its thread before releasing it (milliseconds)
    #[arg(long, default_value_t = 10_000)]
    idle_timeout_ms: u64,

    /// How long the backing pool caches an unused thread (milliseconds)
    #[arg(long, default_value_t = 60_000)]
    thread_keep_alive_ms: u64,

    /// Workload to run (JSON encoded). Runs a built-in workload when omitted.
    #[arg(long, value_name = "JSON")]
    workload: Option<String>,

    /// Workload to run (base64-encoded JSON).
    #[arg(long = "workload-base64", value_name = "BASE64")]
    workload_base64: Option<String>,

    /// Upper bound for the whole run (milliseconds)
    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    report: bool,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.workload.is_some() && args.workload_base64.is_some() {
        return Err("--workload and --workload-base64 may not be used together".into());
    }
    if args.max_threads == 0 {
        return Err("--max-threads must be at least 1".into());
    }
    if args.idle_timeout_ms == 0 {
        return Err("--idle-timeout-ms must be greater than zero".into());
    }
    Ok(())
}

fn load_workload(args: &Args) -> anyhow::Result<Workload> {
    let json = match (&args.workload, &args.workload_base64) {
        (Some(json), None) => json.clone(),
        (None, Some(b64)) => {
            let decoded = BASE64_STANDARD
                .decode(b64)
                .context("--workload-base64 is not valid base64")?;
            String::from_utf8(decoded).context("decoded workload is not valid UTF-8")?
        }
        (None, None) => return Ok(Workload::default()),
        _ => unreachable!("validate_args enforces mutual exclusion"),
    };
    serde_json::from_str(&json).context("invalid workload JSON")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let workload = load_workload(&args)?;
    let config = DispatchConfig::default()
        .with_max_threads(args.max_threads)
        .with_idle_timeout(Duration::from_millis(args.idle_timeout_ms))
        .with_thread_keep_alive(Duration::from_millis(args.thread_keep_alive_ms));

    let diagnostics = Arc::new(Diagnostics::default());
    let sink: Arc<dyn IncidentSink> = diagnostics.clone();
    let coordinator = Coordinator::with_thread_pool_and_sink(config, sink)?;

    info!(
        "Running {} dispatches over {} units with {} producers",
        workload.total_dispatches(),
        workload.units.len(),
        workload.producers
    );
    let timeout = Duration::from_millis(args.timeout_ms);
    let report = run_workload(&coordinator, &workload, timeout)?;

    for unit in &report.units {
        info!(
            "{}: {} of {} delivered, {} failed, {} overlapping",
            unit.name, unit.delivered, unit.dispatched, unit.failed, unit.overlaps
        );
    }
    let failures: u64 = report.units.iter().map(|u| u.failed).sum();
    if failures > 0 {
        warn!("{failures} deliveries failed");
    }
    let incidents = diagnostics.total();
    if incidents > failures {
        warn!("{} incidents besides failed deliveries", incidents - failures);
    }

    if args.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!("Stopping consumer-dispatch");
    if !coordinator.shutdown(timeout) {
        warn!("Some delivery threads did not stop in time");
    }

    Ok(())
}
