//! `dinner`: seats philosophers at a table and prints what they did.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use philosophers::table::{Activity, DEFAULT_STEP_MS};
use philosophers::{
    Dinner, DinnerConfig, DinnerConfigBuilder, DinnerReport, ProtocolKind, RuntimeExecutor,
    SharedExecutor,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ExecutorKind {
    /// Dedicated worker threads
    Pool,
    /// Blocking pool of a tokio runtime
    Tokio,
}

#[derive(Debug, Parser)]
#[command(name = "dinner", about = "Dining philosophers on a task executor", version, long_about = None)]
struct Cli {
    /// YAML configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Table protocol: unsynchronized, waiter, fair-waiter or fork-level.
    #[arg(long)]
    protocol: Option<ProtocolKind>,

    /// Number of seats (and forks).
    #[arg(long)]
    seats: Option<usize>,

    /// Meals per philosopher.
    #[arg(long)]
    meals: Option<u32>,

    /// Threads running dinner tasks (the blocking pool size with --executor tokio).
    #[arg(long)]
    workers: Option<usize>,

    /// Where tasks run.
    #[arg(long, value_enum, default_value_t = ExecutorKind::Pool)]
    executor: ExecutorKind,

    /// Milliseconds per timeline character.
    #[arg(long, default_value_t = DEFAULT_STEP_MS)]
    step_ms: u64,

    /// Print the full report as JSON instead of timelines.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing()?;

    let config = load_config(&args)?;
    info!(?config, "Configuration loaded");

    let report = match args.executor {
        ExecutorKind::Pool => Dinner::with_worker_pool(config)?.run()?,
        ExecutorKind::Tokio => run_on_tokio(config)?,
    };

    print_report(&report, &args)
}

fn load_config(args: &Cli) -> anyhow::Result<DinnerConfig> {
    let base = match &args.config {
        Some(path) => DinnerConfig::from_yaml_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => DinnerConfig::default(),
    };

    let mut builder = DinnerConfigBuilder::from_config(base);
    if let Some(protocol) = args.protocol {
        builder = builder.protocol(protocol);
    }
    if let Some(seats) = args.seats {
        builder = builder.seats(seats);
    }
    if let Some(meals) = args.meals {
        builder = builder.meals(meals);
    }
    builder = match (args.workers, args.seats) {
        (Some(workers), _) => builder.workers(workers),
        // Keep one worker per philosopher when only the table grew
        (None, Some(seats)) if args.config.is_none() => builder.workers(seats + 1),
        _ => builder,
    };
    Ok(builder.build()?)
}

/// Every dinner task goes through `spawn_blocking`, so the blocking pool is
/// what `workers` limits. The driver holds one more blocking thread for the
/// whole dinner.
fn tokio_runtime(workers: usize) -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(workers + 1)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

fn run_on_tokio(config: DinnerConfig) -> anyhow::Result<DinnerReport> {
    let runtime = tokio_runtime(config.workers)?;
    let executor: SharedExecutor = Arc::new(RuntimeExecutor::new(runtime.handle().clone()));
    // The driver blocks, so it runs on the runtime's blocking pool too
    let report = runtime.block_on(async move {
        tokio::task::spawn_blocking(move || Dinner::new(config, executor)?.run()).await
    })??;
    Ok(report)
}

fn print_report(report: &DinnerReport, args: &Cli) -> anyhow::Result<()> {
    if args.json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!(
        "{} seats, {} meals each, {} protocol, {}ms",
        report.seats.len(),
        report.meals,
        report.protocol,
        report.elapsed_ms
    );
    println!("{}", Activity::legend());
    print!("{}", report.render_with_step(args.step_ms));

    let overlaps = report.adjacent_overlaps();
    if overlaps.is_empty() {
        println!("No neighbours ever ate at the same time.");
        return Ok(());
    }
    for overlap in &overlaps {
        warn!(
            seat = overlap.seat,
            neighbour = overlap.neighbour,
            "Neighbours ate at the same time"
        );
    }
    if report.protocol.is_exclusive() {
        bail!(
            "{} protocol let neighbours eat together {} times",
            report.protocol,
            overlaps.len()
        );
    }
    println!(
        "Neighbours ate at the same time {} times (expected without arbitration).",
        overlaps.len()
    );
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_tokio_runtime_caps_blocking_threads() {
        let runtime = tokio_runtime(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        runtime.block_on(async {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    tokio::task::spawn_blocking(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }
        });

        // Two workers plus the driver's thread
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_workers_follow_seats_without_a_config_file() {
        let args = Cli::parse_from(["dinner", "--seats", "6"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.seats, 6);
        assert_eq!(config.workers, 7);
    }
}
