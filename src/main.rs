//! # RAN Handover Simulator - Main Entry Point
//!
//! Headless 5G radio-access handover simulator: user equipments move
//! through a topology of antennas under a stochastic channel model while a
//! decision engine (3GPP Event A3 rule or a learned predictor) hands them
//! between cells, guarded by a ping-pong prevention layer and adaptive QoS
//! confidence thresholds.
//!
//! ## Architecture overview
//!
//! Two threads cooperate:
//!
//! 1. **Main thread**: parses the CLI, loads and validates the scenario,
//!    then blocks on a channel until the simulation side delivers the run
//!    or experiment report, which it serializes to JSON.
//!
//! 2. **Embassy executor thread**: runs the async simulation - one worker
//!    task per UE plus an orchestrator collecting their events. Tasks are
//!    paced by the scaled virtual-time driver in `time_driver`, so batch
//!    runs complete far faster than wall clock.
//!
//! Every run builds an explicit `Runtime` (state manager, engine, trackers,
//! RNG registry) handed to each worker; there are no global decision-state
//! singletons.

use clap::{Parser, Subcommand};
use embassy_executor::{Executor, Spawner};
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

mod a3;
mod channel;
mod control;
mod engine;
mod harness;
mod metrics;
mod mobility;
mod network;
mod pingpong;
mod predictor;
mod qos;
mod reproducibility;
mod signal;
mod simulation;
mod time_driver;

use engine::EngineMode;
use simulation::scenario::{Scenario, load_scenario};
use simulation::{Runtime, run_to_completion};

#[derive(Parser)]
#[command(
    name = "ran-handover-simulator",
    about = "5G RAN handover decision simulator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario once and print its summary.
    Run {
        /// Path to the scenario JSON file.
        scenario: String,
        /// Override the scenario's seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Override the engine mode: a3, ml, or auto.
        #[arg(long)]
        mode: Option<String>,
        /// Write the JSON report here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Run the paired A3-vs-ML experiment across seeds.
    Experiment {
        /// Path to the scenario JSON file.
        scenario: String,
        /// Comma-separated seeds, one paired run per seed.
        #[arg(long, value_delimiter = ',', default_value = "42")]
        seeds: Vec<u64>,
        /// Write the JSON report here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn parse_mode(mode: &str) -> anyhow::Result<EngineMode> {
    match mode {
        "ml" => Ok(EngineMode::Ml),
        "a3" => Ok(EngineMode::A3),
        "auto" => Ok(EngineMode::Auto),
        other => anyhow::bail!("unknown mode '{}' (expected a3, ml, or auto)", other),
    }
}

type ReportSender = mpsc::Sender<anyhow::Result<serde_json::Value>>;

/// Single-run task: build the runtime, run to completion, send the report.
#[embassy_executor::task]
async fn run_task(
    spawner: Spawner,
    scenario: &'static Scenario,
    seed: u64,
    mode: EngineMode,
    report_tx: ReportSender,
) {
    let label = format!(
        "{}-seed{}",
        scenario.name.as_deref().unwrap_or("scenario"),
        seed
    );
    let result = (|| -> anyhow::Result<&'static Runtime> {
        let runtime: &'static Runtime =
            Box::leak(Box::new(Runtime::build(scenario, seed, mode, &label)?));
        if !runtime.rng.verify(32) {
            anyhow::bail!("RNG reproducibility self-test failed");
        }
        Ok(runtime)
    })();

    let report = match result {
        Ok(runtime) => {
            let summary = run_to_completion(spawner, runtime).await;
            if summary.failed {
                Err(anyhow::anyhow!("run {} failed; see log", summary.label))
            } else {
                serde_json::to_value(&summary).map_err(Into::into)
            }
        }
        Err(e) => Err(e),
    };
    let _ = report_tx.send(report);
}

/// Experiment task: paired runs for every seed, then the stats report.
#[embassy_executor::task]
async fn experiment_task(
    spawner: Spawner,
    scenario: &'static Scenario,
    seeds: &'static [u64],
    report_tx: ReportSender,
) {
    let report = match harness::run_experiment(spawner, scenario, seeds).await {
        Ok(report) => serde_json::to_value(&report).map_err(Into::into),
        Err(e) => Err(e),
    };
    let _ = report_tx.send(report);
}

fn write_report(report: &serde_json::Value, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("ran_handover_simulator"), LevelFilter::Debug)
        .init();

    let cli = Cli::parse();

    let (scenario_path, output, seeds, mode_override, is_experiment) = match &cli.command {
        Command::Run {
            scenario,
            seed,
            mode,
            output,
        } => {
            let mode = match mode.as_deref().map(parse_mode) {
                Some(Ok(mode)) => Some(mode),
                Some(Err(e)) => {
                    error!("{}", e);
                    std::process::exit(2);
                }
                None => None,
            };
            (
                scenario.clone(),
                output.clone(),
                seed.map(|s| vec![s]).unwrap_or_default(),
                mode,
                false,
            )
        }
        Command::Experiment {
            scenario,
            seeds,
            output,
        } => (scenario.clone(), output.clone(), seeds.clone(), None, true),
    };

    let scenario = match load_scenario(&scenario_path) {
        Ok(scenario) => scenario,
        Err(e) => {
            error!("Cannot load scenario {}: {}", scenario_path, e);
            std::process::exit(2);
        }
    };
    info!(
        "Loaded scenario {} ({} antennas, {} UEs)",
        scenario.name.as_deref().unwrap_or(&scenario_path),
        scenario.antennas.len(),
        scenario.ues.len()
    );

    time_driver::set_time_scale_percent(scenario.run.speed_percent);

    // The simulation side needs 'static access from executor tasks; the
    // scenario and report channel live for the process lifetime.
    let scenario: &'static Scenario = Box::leak(Box::new(scenario));
    let (report_tx, report_rx) = mpsc::channel::<anyhow::Result<serde_json::Value>>();

    let run_seed = seeds.first().copied().unwrap_or(scenario.run.seed);
    let run_mode = mode_override.unwrap_or(scenario.engine.mode);
    let experiment_seeds: &'static [u64] = Box::leak(seeds.into_boxed_slice());

    // Large stack: hundreds of worker tasks live on the executor thread.
    let _simulation_thread = thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .name("sim-executor".to_string())
        .spawn(move || {
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(|spawner| {
                if is_experiment {
                    let seeds: &'static [u64] = if experiment_seeds.is_empty() {
                        Box::leak(vec![scenario.run.seed].into_boxed_slice())
                    } else {
                        experiment_seeds
                    };
                    spawner
                        .spawn(experiment_task(spawner, scenario, seeds, report_tx))
                        .expect("failed to spawn experiment task");
                } else {
                    spawner
                        .spawn(run_task(spawner, scenario, run_seed, run_mode, report_tx))
                        .expect("failed to spawn run task");
                }
            });
        })
        .expect("failed to spawn simulation thread");

    match report_rx.recv() {
        Ok(Ok(report)) => {
            if let Err(e) = write_report(&report, output.as_ref()) {
                error!("Failed to write report: {}", e);
                std::process::exit(1);
            }
            std::process::exit(0);
        }
        Ok(Err(e)) => {
            error!("Simulation failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Simulation thread exited unexpectedly: {}", e);
            std::process::exit(1);
        }
    }
}
