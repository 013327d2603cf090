//! Simulation core module.
//!
//! Integrates:
//! - Scenario loading and validation
//! - Per-UE worker tasks driving movement, channel, engine, and metrics
//! - The run orchestrator that spawns workers and aggregates their events
//!
//! ## Module organization
//!
//! - `scenario`: configuration schema, defaults, validation
//! - `types`: runtime wiring, channels, worker plans, run summaries
//! - `ue_task`: per-UE worker task
//!
//! The main entry point is `run_to_completion`, awaited on the Embassy
//! executor once per run; the experiment harness calls it repeatedly with
//! fresh runtimes.

pub mod scenario;
pub mod types;
pub mod ue_task;

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use std::collections::HashMap;
use std::sync::atomic::Ordering;

pub use types::{FinalUeState, RunSummary, Runtime};

use types::{UeOutputMessage, UeOutputPayload, UeOutputQueue};
use ue_task::ue_task;

/// Grace period after a stop request before unresponsive workers are
/// abandoned without final persistence.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Run one prepared runtime to completion: spawn a worker per UE, collect
/// their events, and fold everything into a `RunSummary`.
///
/// The output channel is intentionally leaked to satisfy the executor's
/// `'static` requirements; one channel per run lives until process exit.
pub async fn run_to_completion(spawner: Spawner, runtime: &'static Runtime) -> RunSummary {
    let queue: &'static UeOutputQueue = Box::leak(Box::new(UeOutputQueue::new()));
    let receiver = queue.receiver();

    let expected = runtime.plans.len();
    log::info!(
        "Run {}: spawning {} UE workers ({} antennas, mode {})",
        runtime.label,
        expected,
        runtime.state.antenna_count(),
        runtime.engine.mode_body().mode,
    );

    for plan in &runtime.plans {
        if let Err(e) = spawner.spawn(ue_task(runtime, plan.clone(), queue.sender())) {
            log::error!(
                "Run {}: failed to spawn worker for {}: {:?}",
                runtime.label,
                plan.ue_id,
                e
            );
            runtime.counters.worker_died.fetch_add(1, Ordering::Relaxed);
        }
    }

    let mut finished: HashMap<String, FinalUeState> = HashMap::new();
    let mut failed = false;
    let mut ticks_seen: u64 = 0;
    let mut stop_deadline: Option<Instant> = None;

    while finished.len() < expected {
        match select(receiver.receive(), Timer::after(Duration::from_millis(500))).await {
            Either::First(UeOutputMessage { ue_id, payload }) => match payload {
                UeOutputPayload::TickCompleted { t_s, sinr_db, .. } => {
                    ticks_seen += 1;
                    log::trace!("UE {} tick t={:.1}s sinr={:.1} dB", ue_id, t_s, sinr_db);
                }
                UeOutputPayload::HandoverApplied(event) => {
                    log::debug!(
                        "UE {} handover {} -> {} at t={:.1}s",
                        ue_id,
                        event.from.as_deref().unwrap_or("-"),
                        event.to.as_deref().unwrap_or("-"),
                        event.timestamp_s
                    );
                }
                UeOutputPayload::RadioLinkFailure(rlf) => {
                    log::warn!(
                        "UE {} RLF #{} at t={:.1}s (SINR {:.1} dB)",
                        ue_id,
                        rlf.rlf_number,
                        rlf.timestamp_s,
                        rlf.sinr_db
                    );
                }
                UeOutputPayload::Fatal(message) => {
                    log::error!("Run {}: UE {} fatal: {}", runtime.label, ue_id, message);
                    failed = true;
                    runtime.request_stop();
                    // The worker is gone; account for it so the loop can
                    // still converge.
                    runtime.counters.worker_died.fetch_add(1, Ordering::Relaxed);
                    finished.insert(
                        ue_id.clone(),
                        FinalUeState {
                            ue_id,
                            position: (0.0, 0.0, 0.0),
                            connected_to: None,
                            ticks_run: 0,
                        },
                    );
                }
                UeOutputPayload::Finished {
                    final_position,
                    connected_to,
                    ticks_run,
                } => {
                    log::info!(
                        "UE {} finished after {} ticks at ({:.1}, {:.1})",
                        ue_id,
                        ticks_run,
                        final_position.0,
                        final_position.1
                    );
                    finished.insert(
                        ue_id.clone(),
                        FinalUeState {
                            ue_id,
                            position: final_position,
                            connected_to,
                            ticks_run,
                        },
                    );
                }
            },
            Either::Second(()) => {
                // Periodic deadline: enforce the stop grace period.
                if runtime.stop_requested() {
                    let deadline = *stop_deadline.get_or_insert(Instant::now() + STOP_GRACE);
                    if Instant::now() >= deadline {
                        let missing = expected - finished.len();
                        log::error!(
                            "Run {}: abandoning {} unresponsive workers after stop",
                            runtime.label,
                            missing
                        );
                        runtime
                            .counters
                            .worker_died
                            .fetch_add(missing as u64, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }
    }

    log::info!(
        "Run {}: complete ({} workers, {} tick events)",
        runtime.label,
        finished.len(),
        ticks_seen
    );

    summarize(runtime, finished, failed)
}

fn summarize(
    runtime: &Runtime,
    finished: HashMap<String, FinalUeState>,
    failed: bool,
) -> RunSummary {
    let duration = runtime.run.duration_s;
    let ue_ids: Vec<String> = runtime.plans.iter().map(|p| p.ue_id.clone()).collect();

    let mean_throughput = if ue_ids.is_empty() {
        0.0
    } else {
        ue_ids
            .iter()
            .map(|ue| runtime.metrics.average_throughput_mbps(ue))
            .sum::<f64>()
            / ue_ids.len() as f64
    };
    let total_interruption = ue_ids
        .iter()
        .map(|ue| runtime.metrics.total_interruption_s(ue, duration))
        .sum::<f64>();

    let suppressions_by_reason: HashMap<String, u64> = runtime
        .counters
        .suppressions()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    let mut final_ue_states: Vec<FinalUeState> = finished.into_values().collect();
    final_ue_states.sort_by(|a, b| a.ue_id.cmp(&b.ue_id));

    // Per-UE state is cleared once the final positions are captured.
    for ue in &ue_ids {
        runtime.state.remove_ue(ue);
        runtime.rng.clear(ue);
        runtime.metrics.remove_ue(ue);
        runtime.pingpong.remove_ue(ue);
    }

    RunSummary {
        label: runtime.label.clone(),
        seed: runtime.rng.global_seed(),
        mode: runtime.engine.mode_body().mode,
        duration_s: duration,
        ue_count: ue_ids.len(),
        handovers_applied: runtime.counters.handover_applied.load(Ordering::Relaxed),
        handovers_skipped: runtime.counters.handover_skipped.load(Ordering::Relaxed),
        handovers_suppressed: runtime.counters.handover_suppressed.load(Ordering::Relaxed),
        suppressions_by_reason,
        rlf_total: runtime.metrics.total_rlf_count(),
        mean_throughput_mbps: mean_throughput,
        total_interruption_s: total_interruption,
        final_ue_states,
        counters: runtime.counters.snapshot(),
        failed,
    }
}
