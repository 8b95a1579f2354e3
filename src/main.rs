// src/main.rs
mod config;
mod drivers;
mod engine;
mod runtime;
mod simulator;
mod types;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam::channel;

use crate::config::PipelineConfig;
use crate::runtime::RunOptions;

#[derive(Parser)]
#[command(
    name = "neurotrigger",
    version,
    about = "Biosignal threshold trigger: UDP samples in, serial commands out"
)]
struct Cli {
    /// JSON configuration file; missing fields use the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the acquisition + trigger pipeline (press Enter to stop)
    Run(RunArgs),
    /// Send a synthetic stream to the pipeline's UDP address
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Serial device of the actuator
    #[arg(long, env = "NEUROTRIGGER_SERIAL_PORT")]
    serial_port: String,

    #[arg(long)]
    baud_rate: Option<u32>,

    /// Local UDP address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Trigger threshold T (display range becomes [-T, T])
    #[arg(long)]
    threshold: Option<f64>,

    /// Stop automatically after this many seconds
    #[arg(long)]
    duration_secs: Option<f64>,
}

#[derive(Args)]
struct SimulateArgs {
    /// Destination address (defaults to the configured bind address)
    #[arg(long)]
    target: Option<String>,

    #[arg(long)]
    duration_secs: Option<f64>,
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn seconds(value: Option<f64>) -> Result<Option<Duration>> {
    value
        .map(|s| Duration::try_from_secs_f64(s).with_context(|| format!("invalid duration {s}")))
        .transpose()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    // Enter 键停止; 保留一个 sender，stdin 关闭时不会误触发
    let (stop_tx, stop_rx) = channel::bounded(1);
    runtime::watch_stdin(stop_tx.clone())?;

    match cli.command {
        Command::Run(args) => {
            config.serial.port = args.serial_port;
            if let Some(baud) = args.baud_rate {
                config.serial.baud_rate = baud;
            }
            if let Some(bind) = args.bind {
                config.bind_address = bind;
            }
            if let Some(t) = args.threshold {
                config.threshold_range = [-t.abs(), t.abs()];
            }
            let options = RunOptions {
                duration: seconds(args.duration_secs)?,
                stop: Some(stop_rx),
                viewer: None,
            };
            let summary = runtime::run(&config, options)?;
            log::info!("run finished: {summary:?}");
        }
        Command::Simulate(args) => {
            let target = args.target.unwrap_or_else(|| config.bind_address.clone());
            let duration = seconds(args.duration_secs)?;
            simulator::run_simulator(&config, &target, duration, Some(stop_rx))?;
        }
    }
    drop(stop_tx);
    Ok(())
}
