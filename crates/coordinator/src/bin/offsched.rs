//! offsched — run the offload scheduler on a simulated host together with
//! its userspace coordinator, printing one latency report per interval.
//!
//! # Usage
//!
//! ```bash
//! # Fair policy, heartbeat offload, 4 processors, 10 seconds
//! offsched
//!
//! # Per-enqueue offload under FIFO, JSON reports, until Ctrl-C
//! offsched --mode fifo --offload per-enqueue --format json --duration-secs 0
//!
//! # From a config file, restarting the scheduler twice
//! OFFSCHED_CONFIG=config/offsched.toml offsched --restarts 2
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use offsched_coordinator::{Coordinator, WriterSink};
use offsched_core::{load_dotenv, OffloadMode, PolicyMode, ReportFormat, SchedulerConfig};
use offsched_sched::{ExitKind, OffloadScheduler, SchedOps, SimHost};

/// Offload scheduler with a userspace coordinator on a simulated host.
#[derive(Parser, Debug)]
#[command(name = "offsched", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "OFFSCHED_CONFIG")]
    config: Option<PathBuf>,

    /// Policy mode: "fifo" or "fair".
    #[arg(long)]
    mode: Option<PolicyMode>,

    /// Offload mode: "off", "per-enqueue", "inline" or "heartbeat".
    #[arg(long)]
    offload: Option<OffloadMode>,

    /// Simulated processors.
    #[arg(long, default_value_t = 4)]
    cpus: u32,

    /// Worker tasks to spawn besides the coordinator.
    #[arg(long, default_value_t = 8)]
    tasks: u32,

    /// Work per task in milliseconds (0 = run until the scheduler stops).
    #[arg(long, default_value_t = 0)]
    work_ms: u64,

    /// Length of each scheduler run in seconds (0 = until Ctrl-C).
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Report format: "csv" or "json".
    #[arg(long)]
    format: Option<ReportFormat>,

    /// How many times to restart the scheduler after a run ends.
    #[arg(long, default_value_t = 0)]
    restarts: u32,
}

impl Cli {
    fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => SchedulerConfig::from_env().context("invalid environment configuration")?,
        };
        if let Some(mode) = self.mode {
            config.policy.mode = mode;
        }
        if let Some(offload) = self.offload {
            config.policy.offload = offload;
        }
        if let Some(format) = self.format {
            config.coordinator.format = format;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    info!(?cli, "starting offsched");

    let config = cli.scheduler_config()?;
    info!(
        mode = %config.policy.mode,
        offload = %config.policy.offload,
        capacity = config.channel.capacity,
        "configuration loaded"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_for_signal.store(true, Ordering::Relaxed);
    });

    let sched = Arc::new(OffloadScheduler::new(config.clone()));
    let mut restarts_left = cli.restarts;
    loop {
        let restart = restarts_left > 0;
        match run_instance(&cli, &config, sched.clone(), shutdown.clone(), restart).await? {
            ExitKind::Restart if !shutdown.load(Ordering::Relaxed) => {
                restarts_left -= 1;
                info!(restarts_left, "restarting scheduler");
            }
            ExitKind::Error(reason) => anyhow::bail!("scheduler exited with error: {reason}"),
            _ => break,
        }
    }

    info!("offsched exited cleanly");
    Ok(())
}

/// One scheduler lifetime: init, spawn the workload, run processors and
/// the coordinator until the run ends, then exit.
async fn run_instance(
    cli: &Cli,
    config: &SchedulerConfig,
    sched: Arc<OffloadScheduler>,
    shutdown: Arc<AtomicBool>,
    restart: bool,
) -> anyhow::Result<ExitKind> {
    let host = Arc::new(SimHost::new(cli.cpus));
    let ctx = Arc::new(sched.init(host.clone()).context("scheduler init failed")?);

    let consumer = host.spawn("offsched-coordinator", None);
    ctx.set_consumer(consumer.id());
    host.wake(sched.as_ref(), &ctx, consumer.key)?;

    let work = (cli.work_ms > 0).then(|| cli.work_ms.saturating_mul(1_000_000));
    for i in 0..cli.tasks {
        let task = host.spawn(&format!("worker-{i}"), work);
        host.wake(sched.as_ref(), &ctx, task.key)?;
    }

    let mut coordinator = Coordinator::for_context(config.coordinator.clone(), ctx.clone());
    let coordinator_stop = coordinator.shutdown_signal();
    let format = config.coordinator.format;
    let coordinator_task = tokio::task::spawn_blocking(move || {
        let mut sink = WriterSink::stdout(format);
        coordinator.run(&mut sink)
    });

    let processors_stop = Arc::new(AtomicBool::new(false));
    let processors = {
        let (host, sched, ctx, stop) = (host.clone(), sched.clone(), ctx.clone(), processors_stop.clone());
        tokio::task::spawn_blocking(move || host.run(sched.as_ref(), &ctx, &stop))
    };

    let deadline = (cli.duration_secs > 0).then(|| Instant::now() + Duration::from_secs(cli.duration_secs));
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let kind = loop {
        tick.tick().await;
        if ctx.has_exited() || shutdown.load(Ordering::Relaxed) {
            break ExitKind::Normal;
        }
        // Only the coordinator task is left.
        if work.is_some() && host.len() <= 1 {
            info!("all workers finished");
            break ExitKind::Normal;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break if restart { ExitKind::Restart } else { ExitKind::Normal };
        }
    };

    sched.exit(&ctx, kind);
    processors_stop.store(true, Ordering::Relaxed);
    coordinator_stop.store(true, Ordering::Relaxed);

    if let Err(e) = processors.await.context("processor pool panicked")? {
        error!(error = %e, "scheduler hook failed");
    }
    coordinator_task
        .await
        .context("coordinator panicked")?
        .context("coordinator failed")?;

    Ok(ctx.exit_kind().unwrap_or(ExitKind::Normal))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
