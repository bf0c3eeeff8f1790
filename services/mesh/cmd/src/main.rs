//! Mesh simulator binary.
//!
//! Runs a master and a set of nodes on one simulated medium, drives the
//! cooperative update loop on a fixed tick and prints per-node statistics as
//! JSON when the configured duration elapses or on Ctrl-C.

use anyhow::Context;
use clap::Parser;
use mesh_network::SystemClock;
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod simulation;

use config::SimulationConfig;
use logging::MeshLogFormatter;
use simulation::Simulation;

/// Simulated radio tree mesh
#[derive(Parser, Debug)]
#[command(name = "rf-mesh", version, about = "Simulated multi-hop radio tree mesh")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "rf-mesh.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Interval between update rounds, e.g. 10ms
    #[arg(long)]
    tick: Option<humantime::Duration>,

    /// Stop after this long, e.g. 30s
    #[arg(long)]
    duration: Option<humantime::Duration>,

    /// Interval between messages from each node, e.g. 1s
    #[arg(long)]
    send_interval: Option<humantime::Duration>,

    /// Bytes per message
    #[arg(long)]
    payload_size: Option<usize>,

    /// Per-attempt loss probability on the medium
    #[arg(long)]
    loss: Option<f64>,

    /// Seed for the loss generator
    #[arg(long)]
    seed: Option<u64>,

    /// Write the statistics to this file instead of stdout
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(tick) = &self.tick {
            config.tick = **tick;
        }
        if let Some(duration) = &self.duration {
            config.duration = Some(**duration);
        }
        if let Some(interval) = &self.send_interval {
            config.send_interval = **interval;
        }
        if let Some(size) = self.payload_size {
            config.payload_size = size;
        }
        if let Some(loss) = self.loss {
            config.medium.loss = loss;
        }
        if let Some(seed) = self.seed {
            config.medium.seed = seed;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("rf_mesh={}", args.log_level).parse()?)
        .add_directive(format!("mesh_directory={}", args.log_level).parse()?)
        .add_directive(format!("mesh_network={}", args.log_level).parse()?)
        .add_directive(format!("mesh_storage={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(MeshLogFormatter::new("rf-mesh"))
        .init();

    info!("Starting rf-mesh simulator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = SimulationConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    let deadline = config.duration;

    let mut simulation = Simulation::new(config, SystemClock)?;

    let mut interval = tokio::time::interval(simulation.tick());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = tokio::time::Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_assigned = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                simulation.step();
                let assigned = simulation.assigned();
                if assigned != last_assigned {
                    info!("{} nodes assigned", assigned);
                    last_assigned = assigned;
                }
                if deadline.is_some_and(|limit| started.elapsed() >= limit) {
                    info!("Duration elapsed");
                    break;
                }
            }
            result = &mut ctrl_c => {
                result.context("waiting for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    let report = serde_json::to_string_pretty(&simulation.report())?;
    match args.stats_out {
        Some(path) => {
            std::fs::write(&path, report)
                .with_context(|| format!("writing statistics to {}", path.display()))?;
            info!("Statistics written to {}", path.display());
        }
        None => println!("{}", report),
    }
    Ok(())
}
