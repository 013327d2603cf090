//! Type definitions for the simulation.
//!
//! Contains the runtime wiring shared by the orchestrator and the per-UE
//! worker tasks: the run-scoped `Runtime` value, worker output channels,
//! per-UE movement plans, and the run summary shape.

use crate::engine::{EngineConfig, EngineMode, HandoverEngine};
use crate::metrics::{Counters, MetricsCollector, RlfEvent};
use crate::network::{HandoverEvent, NetworkState, TrajectoryPoint, UeState};
use crate::pingpong::PingPongTracker;
use crate::predictor::{NearestAntennaPredictor, Predictor, RemotePredictor};
use crate::qos::QosProfile;
use crate::qos::adaptive::AdaptiveQosThresholds;
use crate::reproducibility::RngRegistry;
use crate::simulation::scenario::{PredictorConfig, RunConfig, Scenario, SpeedProfile};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Worker task pool size; scenarios are validated against it.
pub const MAX_UE_COUNT: usize = 512;

/// Depth of the workers-to-orchestrator channel. Large enough to absorb a
/// burst of tick events from hundreds of workers without blocking them.
pub const UE_OUTPUT_CHANNEL_SIZE: usize = 500;

/// Bounded channel used by UE workers to publish events for the
/// orchestrator.
pub type UeOutputQueue = embassy_sync::channel::Channel<
    CriticalSectionRawMutex,
    UeOutputMessage,
    UE_OUTPUT_CHANNEL_SIZE,
>;
/// Receiver side of the worker output channel.
pub type UeOutputQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    UeOutputMessage,
    UE_OUTPUT_CHANNEL_SIZE,
>;
/// Sender side of the worker output channel.
pub type UeOutputQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    UeOutputMessage,
    UE_OUTPUT_CHANNEL_SIZE,
>;

/// Events emitted by UE workers into the orchestrator loop.
pub enum UeOutputPayload {
    /// A tick finished; lightweight progress sample.
    TickCompleted {
        t_s: f64,
        sinr_db: f64,
        throughput_mbps: f64,
    },
    /// An applied handover, already recorded in the shared state.
    HandoverApplied(HandoverEvent),
    /// A declared radio link failure.
    RadioLinkFailure(RlfEvent),
    /// Channel arithmetic failed; the run must fail loud.
    Fatal(String),
    /// Worker ran to completion (or honored a stop request).
    Finished {
        final_position: (f64, f64, f64),
        connected_to: Option<String>,
        ticks_run: u64,
    },
}

/// Envelope for worker events.
pub struct UeOutputMessage {
    pub ue_id: String,
    pub payload: UeOutputPayload,
}

/// Movement plan for one worker, derived from the scenario.
#[derive(Debug, Clone)]
pub struct UePlan {
    pub ue_id: String,
    /// Waypoints one base-speed meter apart, walked cyclically.
    pub path: Vec<(f64, f64, f64)>,
    /// Waypoints skipped per second of simulated time.
    pub step: usize,
    pub qos_profile: Option<QosProfile>,
}

impl UePlan {
    pub fn from_scenario(
        ue_id: &str,
        path: Vec<(f64, f64, f64)>,
        profile: SpeedProfile,
        qos_profile: Option<QosProfile>,
    ) -> Self {
        Self {
            ue_id: ue_id.to_string(),
            path,
            step: profile.step(),
            qos_profile,
        }
    }
}

/// Everything a run needs, passed explicitly to each worker and handler.
/// No global singletons: the harness builds one `Runtime` per run.
pub struct Runtime {
    pub label: String,
    pub rng: Arc<RngRegistry>,
    pub state: Arc<NetworkState>,
    pub pingpong: Arc<PingPongTracker>,
    pub adaptive: Arc<AdaptiveQosThresholds>,
    pub metrics: Arc<MetricsCollector>,
    pub counters: Arc<Counters>,
    pub engine: HandoverEngine,
    pub run: RunConfig,
    pub plans: Vec<UePlan>,
    /// Checked by workers between ticks; set by `request_stop`.
    pub stop: AtomicBool,
}

impl Runtime {
    /// Build a run-scoped runtime from a scenario, with the seed and mode
    /// chosen by the caller (the harness varies both across runs).
    pub fn build(
        scenario: &Scenario,
        seed: u64,
        mode: EngineMode,
        label: &str,
    ) -> anyhow::Result<Runtime> {
        let rng = Arc::new(RngRegistry::new(seed));
        let pingpong = Arc::new(PingPongTracker::new(scenario.pingpong.history_len));
        let state = Arc::new(NetworkState::new(
            scenario.radio.clone(),
            Arc::clone(&rng),
            Arc::clone(&pingpong),
        ));
        let adaptive = Arc::new(AdaptiveQosThresholds::new(scenario.adaptive_qos.clone()));
        let metrics = Arc::new(MetricsCollector::new(scenario.rlf.clone()));
        let counters = Arc::new(Counters::new());

        for antenna in &scenario.antennas {
            state.register_antenna(antenna.clone());
        }
        for alias in &scenario.aliases {
            state.register_alias(&alias.alias, &alias.canonical);
        }

        let predictor: Box<dyn Predictor> = match &scenario.predictor {
            PredictorConfig::Nearest { confidence } => Box::new(NearestAntennaPredictor::new(
                Arc::clone(&state),
                *confidence,
            )),
            PredictorConfig::Remote { config_path } => {
                let path = std::path::PathBuf::from(config_path);
                let endpoint = crate::control::PredictorEndpointConfig::load(&path)
                    .map_err(anyhow::Error::msg)?;
                let client =
                    crate::control::PredictionClient::new(endpoint).map_err(anyhow::Error::msg)?;
                Box::new(RemotePredictor::new(client))
            }
        };

        let engine_config = EngineConfig {
            mode,
            ..scenario.engine.clone()
        };
        let engine = HandoverEngine::new(
            engine_config,
            scenario.pingpong.clone(),
            Arc::clone(&state),
            Arc::clone(&pingpong),
            Arc::clone(&adaptive),
            Arc::clone(&metrics),
            Arc::clone(&counters),
            predictor,
        )
        .map_err(|e| anyhow::anyhow!("engine configuration: {}", e))?;

        let mut plans = Vec::with_capacity(scenario.ues.len());
        for ue in &scenario.ues {
            plans.push(UePlan::from_scenario(
                &ue.ue_id,
                ue.path.clone(),
                ue.speed_profile,
                ue.qos_profile.clone(),
            ));
        }

        let runtime = Runtime {
            label: label.to_string(),
            rng,
            state: Arc::clone(&state),
            pingpong,
            adaptive,
            metrics,
            counters,
            engine,
            run: scenario.run.clone(),
            plans,
            stop: AtomicBool::new(false),
        };
        runtime.seed_ue_states();
        Ok(runtime)
    }

    /// Insert the scenario's UEs into the state map with their trajectories
    /// (one sample per waypoint at base speed).
    fn seed_ue_states(&self) {
        for plan in &self.plans {
            let trajectory = plan
                .path
                .iter()
                .enumerate()
                .map(|(i, p)| TrajectoryPoint {
                    t_s: i as f64,
                    position: *p,
                })
                .collect();
            self.state.insert_ue(
                &plan.ue_id,
                UeState {
                    position: plan.path[0],
                    trajectory,
                    qos_profile: plan.qos_profile.clone(),
                    ..UeState::default()
                },
            );
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Last known state of a UE at run end.
#[derive(Debug, Clone, Serialize)]
pub struct FinalUeState {
    pub ue_id: String,
    pub position: (f64, f64, f64),
    pub connected_to: Option<String>,
    pub ticks_run: u64,
}

/// Aggregated result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub label: String,
    pub seed: u64,
    pub mode: String,
    pub duration_s: f64,
    pub ue_count: usize,
    pub handovers_applied: u64,
    pub handovers_skipped: u64,
    pub handovers_suppressed: u64,
    pub suppressions_by_reason: HashMap<String, u64>,
    pub rlf_total: u32,
    pub mean_throughput_mbps: f64,
    pub total_interruption_s: f64,
    pub final_ue_states: Vec<FinalUeState>,
    pub counters: serde_json::Value,
    pub failed: bool,
}
