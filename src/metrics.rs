//! Radio link failure detection, throughput modeling, handover
//! interruption tracking, and the counters surface.
//!
//! Three concerns sit behind one façade (`MetricsCollector`):
//! - T310-style RLF timer per UE, paused while a handover interruption is
//!   active
//! - piecewise SINR-to-throughput with graceful degradation in the RLF zone
//! - a bounded FIFO of handover interruption windows per UE, with
//!   evict-once accumulation of completed durations

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

fn default_rlf_threshold() -> f64 {
    -6.0
}
fn default_rlf_duration() -> f64 {
    1.0
}
fn default_min_decodable() -> f64 {
    -10.0
}
fn default_rlf_zone_efficiency() -> f64 {
    0.5
}
fn default_max_efficiency() -> f64 {
    6.0
}
fn default_bandwidth() -> f64 {
    20e6
}
fn default_interruption_duration() -> f64 {
    0.050
}
fn default_queue_cap() -> usize {
    20
}

/// RLF, throughput and interruption parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RlfConfig {
    /// SINR below which the RLF timer runs.
    #[serde(default = "default_rlf_threshold")]
    pub rlf_threshold_db: f64,
    /// Time below threshold before RLF is declared (T310), inclusive.
    #[serde(default = "default_rlf_duration")]
    pub rlf_duration_s: f64,
    /// Below this SINR no connection is possible at all.
    #[serde(default = "default_min_decodable")]
    pub min_decodable_sinr_db: f64,
    /// Spectral efficiency (bit/s/Hz) at the top of the RLF zone.
    #[serde(default = "default_rlf_zone_efficiency")]
    pub rlf_zone_efficiency: f64,
    /// Shannon efficiency cap (64-QAM territory).
    #[serde(default = "default_max_efficiency")]
    pub max_efficiency: f64,
    #[serde(default = "default_bandwidth")]
    pub bandwidth_hz: f64,
    /// Blackout per handover.
    #[serde(default = "default_interruption_duration")]
    pub interruption_duration_s: f64,
    /// Per-UE interruption FIFO capacity; raise for extreme ping-pong
    /// analyses. Overflow drops the oldest record and is counted.
    #[serde(default = "default_queue_cap")]
    pub interruption_queue_cap: usize,
}

impl Default for RlfConfig {
    fn default() -> Self {
        Self {
            rlf_threshold_db: default_rlf_threshold(),
            rlf_duration_s: default_rlf_duration(),
            min_decodable_sinr_db: default_min_decodable(),
            rlf_zone_efficiency: default_rlf_zone_efficiency(),
            max_efficiency: default_max_efficiency(),
            bandwidth_hz: default_bandwidth(),
            interruption_duration_s: default_interruption_duration(),
            interruption_queue_cap: default_queue_cap(),
        }
    }
}

/// A declared radio link failure.
#[derive(Debug, Clone, Serialize)]
pub struct RlfEvent {
    pub ue_id: String,
    pub timestamp_s: f64,
    pub duration_s: f64,
    pub sinr_db: f64,
    pub serving_cell: Option<String>,
    pub rlf_number: u32,
}

#[derive(Debug, Default)]
struct UeRlfState {
    rlf_timer_start: Option<f64>,
    in_interruption: bool,
    rlf_count: u32,
    last_sinr_db: f64,
}

/// T310 radio link failure detector.
#[derive(Debug, Default)]
pub struct RlfDetector {
    states: HashMap<String, UeRlfState>,
    events: Vec<RlfEvent>,
}

impl RlfDetector {
    fn state(&mut self, ue_id: &str) -> &mut UeRlfState {
        self.states.entry(ue_id.to_string()).or_default()
    }

    /// Handover begins: pause detection and clear any running timer so the
    /// ongoing incident does not fire during the switchover.
    pub fn notify_handover_start(&mut self, ue_id: &str, now_s: f64) {
        let state = self.state(ue_id);
        state.in_interruption = true;
        if let Some(started) = state.rlf_timer_start.take() {
            log::debug!(
                "UE {}: RLF timer cleared by handover start (ran {:.2}s)",
                ue_id,
                now_s - started
            );
        }
    }

    pub fn notify_handover_complete(&mut self, ue_id: &str, _now_s: f64) {
        self.state(ue_id).in_interruption = false;
    }

    /// Advance the RLF timer with a new SINR sample. Returns the declared
    /// event, if any. The duration comparison is inclusive so a timer that
    /// has run exactly `rlf_duration_s` fires.
    pub fn check_rlf(
        &mut self,
        ue_id: &str,
        sinr_db: f64,
        now_s: f64,
        serving_cell: Option<&str>,
        config: &RlfConfig,
    ) -> Option<RlfEvent> {
        let state = self.state(ue_id);
        state.last_sinr_db = sinr_db;

        if state.in_interruption {
            return None;
        }

        if sinr_db < config.rlf_threshold_db {
            let started = *state.rlf_timer_start.get_or_insert(now_s);
            let duration = now_s - started;
            if duration >= config.rlf_duration_s {
                state.rlf_count += 1;
                state.rlf_timer_start = None;
                let event = RlfEvent {
                    ue_id: ue_id.to_string(),
                    timestamp_s: now_s,
                    duration_s: duration,
                    sinr_db,
                    serving_cell: serving_cell.map(str::to_string),
                    rlf_number: state.rlf_count,
                };
                log::warn!(
                    "UE {}: RLF declared (SINR {:.2} dB for {:.3}s, total {})",
                    ue_id,
                    sinr_db,
                    duration,
                    state.rlf_count
                );
                self.events.push(event.clone());
                return Some(event);
            }
        } else {
            state.rlf_timer_start = None;
        }
        None
    }

    pub fn rlf_count(&self, ue_id: &str) -> u32 {
        self.states.get(ue_id).map_or(0, |s| s.rlf_count)
    }

    pub fn total_rlf_count(&self) -> u32 {
        self.states.values().map(|s| s.rlf_count).sum()
    }

    pub fn events(&self) -> &[RlfEvent] {
        &self.events
    }

    pub fn remove_ue(&mut self, ue_id: &str) {
        self.states.remove(ue_id);
    }
}

/// Piecewise SINR-to-throughput mapping.
#[derive(Debug, Clone)]
pub struct ThroughputModel;

impl ThroughputModel {
    /// Instantaneous throughput in Mbps. Zero during interruption and below
    /// the decodability floor, linear ramp inside the RLF zone, capped
    /// Shannon capacity above it.
    pub fn throughput_mbps(sinr_db: f64, in_interruption: bool, config: &RlfConfig) -> f64 {
        if in_interruption {
            return 0.0;
        }
        if sinr_db < config.min_decodable_sinr_db {
            return 0.0;
        }
        if sinr_db < config.rlf_threshold_db {
            let range = config.rlf_threshold_db - config.min_decodable_sinr_db;
            let position = (sinr_db - config.min_decodable_sinr_db) / range;
            let efficiency = position * config.rlf_zone_efficiency;
            return efficiency * config.bandwidth_hz / 1e6;
        }
        let sinr_linear = 10f64.powf(sinr_db / 10.0);
        let efficiency = (1.0 + sinr_linear).log2().min(config.max_efficiency);
        efficiency * config.bandwidth_hz / 1e6
    }
}

/// One handover blackout window.
#[derive(Debug, Clone, Serialize)]
pub struct Interruption {
    pub start_s: f64,
    pub end_s: f64,
    pub source: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Default)]
struct UeInterruptionState {
    queue: VecDeque<Interruption>,
    total_completed_s: f64,
    handover_count: u32,
}

/// Per-UE FIFO of interruption windows.
///
/// Completed windows are evicted lazily and their full duration is added to
/// the accumulator exactly once. Overlapping windows are both counted:
/// two handovers 30 ms apart cost two full blackouts by design.
#[derive(Debug, Default)]
pub struct InterruptionTracker {
    states: HashMap<String, UeInterruptionState>,
    overflow_count: u64,
}

impl InterruptionTracker {
    fn state(&mut self, ue_id: &str) -> &mut UeInterruptionState {
        self.states.entry(ue_id.to_string()).or_default()
    }

    pub fn record_handover(
        &mut self,
        ue_id: &str,
        now_s: f64,
        source: Option<&str>,
        target: Option<&str>,
        config: &RlfConfig,
    ) {
        let cap = config.interruption_queue_cap.max(1);
        let state = self.state(ue_id);
        if state.queue.len() >= cap {
            // Drop-oldest; an evicted-but-unfinished record loses its
            // contribution, which the warning surfaces.
            state.queue.pop_front();
            self.overflow_count += 1;
            log::warn!(
                "UE {}: interruption queue overflow (cap {}), dropped oldest",
                ue_id,
                cap
            );
        }
        let state = self.state(ue_id);
        state.queue.push_back(Interruption {
            start_s: now_s,
            end_s: now_s + config.interruption_duration_s,
            source: source.map(str::to_string),
            target: target.map(str::to_string),
        });
        state.handover_count += 1;
        if state.queue.len() > 2 {
            log::warn!(
                "UE {}: {} concurrent interruptions queued (ping-pong?)",
                ue_id,
                state.queue.len()
            );
        }
    }

    fn evict_completed(&mut self, ue_id: &str, now_s: f64) {
        let state = self.state(ue_id);
        while let Some(front) = state.queue.front() {
            if front.end_s <= now_s {
                state.total_completed_s += front.end_s - front.start_s;
                state.queue.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether `now_s` falls inside any active interruption window.
    pub fn is_in_interruption(&mut self, ue_id: &str, now_s: f64) -> bool {
        self.evict_completed(ue_id, now_s);
        self.state(ue_id)
            .queue
            .iter()
            .any(|i| i.start_s <= now_s && now_s < i.end_s)
    }

    /// Accumulated interruption time: completed windows plus the elapsed
    /// portion of any still-active one.
    pub fn total_interruption_s(&mut self, ue_id: &str, now_s: f64) -> f64 {
        self.evict_completed(ue_id, now_s);
        let state = self.state(ue_id);
        let active: f64 = state
            .queue
            .iter()
            .map(|i| {
                if i.start_s <= now_s && now_s < i.end_s {
                    now_s - i.start_s
                } else {
                    i.end_s - i.start_s
                }
            })
            .sum();
        state.total_completed_s + active
    }

    pub fn handover_count(&self, ue_id: &str) -> u32 {
        self.states.get(ue_id).map_or(0, |s| s.handover_count)
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn remove_ue(&mut self, ue_id: &str) {
        self.states.remove(ue_id);
    }
}

/// Per-tick metrics snapshot returned from `MetricsCollector::update`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ue_id: String,
    pub timestamp_s: f64,
    pub sinr_db: f64,
    pub throughput_mbps: f64,
    pub in_interruption: bool,
    pub rlf_event: Option<RlfEvent>,
    pub rlf_count: u32,
    pub handover_count: u32,
}

#[derive(Default)]
struct CollectorInner {
    rlf: RlfDetector,
    interruptions: InterruptionTracker,
    cumulative_throughput: HashMap<String, f64>,
    cumulative_time: HashMap<String, f64>,
}

/// Unified metrics façade used by the per-UE workers.
pub struct MetricsCollector {
    config: RlfConfig,
    inner: Mutex<CollectorInner>,
}

impl MetricsCollector {
    pub fn new(config: RlfConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CollectorInner::default()),
        }
    }

    pub fn config(&self) -> &RlfConfig {
        &self.config
    }

    /// Per-tick update: synchronize the RLF interruption flag with the
    /// interruption tracker, compute throughput, run the RLF check, and
    /// accumulate throughput-time.
    pub fn update(
        &self,
        ue_id: &str,
        sinr_db: f64,
        now_s: f64,
        dt_s: f64,
        serving_cell: Option<&str>,
    ) -> MetricsSnapshot {
        let mut inner = self.inner.lock().unwrap();
        let in_interruption = inner.interruptions.is_in_interruption(ue_id, now_s);

        let rlf_in_interruption = inner
            .rlf
            .states
            .get(ue_id)
            .map_or(false, |s| s.in_interruption);
        if in_interruption && !rlf_in_interruption {
            inner.rlf.notify_handover_start(ue_id, now_s);
        } else if !in_interruption && rlf_in_interruption {
            inner.rlf.notify_handover_complete(ue_id, now_s);
        }

        let throughput =
            ThroughputModel::throughput_mbps(sinr_db, in_interruption, &self.config);
        let rlf_event = inner
            .rlf
            .check_rlf(ue_id, sinr_db, now_s, serving_cell, &self.config);

        *inner
            .cumulative_throughput
            .entry(ue_id.to_string())
            .or_insert(0.0) += throughput * dt_s;
        *inner
            .cumulative_time
            .entry(ue_id.to_string())
            .or_insert(0.0) += dt_s;

        MetricsSnapshot {
            ue_id: ue_id.to_string(),
            timestamp_s: now_s,
            sinr_db,
            throughput_mbps: throughput,
            in_interruption,
            rlf_count: inner.rlf.rlf_count(ue_id),
            handover_count: inner.interruptions.handover_count(ue_id),
            rlf_event,
        }
    }

    /// Record an applied handover: start the RLF pause and enqueue the
    /// interruption window.
    pub fn record_handover(
        &self,
        ue_id: &str,
        now_s: f64,
        source: Option<&str>,
        target: Option<&str>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.rlf.notify_handover_start(ue_id, now_s);
        inner
            .interruptions
            .record_handover(ue_id, now_s, source, target, &self.config);
    }

    pub fn average_throughput_mbps(&self, ue_id: &str) -> f64 {
        let inner = self.inner.lock().unwrap();
        let time = inner.cumulative_time.get(ue_id).copied().unwrap_or(0.0);
        if time <= 0.0 {
            return 0.0;
        }
        inner
            .cumulative_throughput
            .get(ue_id)
            .copied()
            .unwrap_or(0.0)
            / time
    }

    pub fn total_interruption_s(&self, ue_id: &str, now_s: f64) -> f64 {
        self.inner
            .lock()
            .unwrap()
            .interruptions
            .total_interruption_s(ue_id, now_s)
    }

    pub fn total_rlf_count(&self) -> u32 {
        self.inner.lock().unwrap().rlf.total_rlf_count()
    }

    pub fn rlf_events(&self) -> Vec<RlfEvent> {
        self.inner.lock().unwrap().rlf.events().to_vec()
    }

    pub fn interruption_overflow_count(&self) -> u64 {
        self.inner.lock().unwrap().interruptions.overflow_count()
    }

    pub fn remove_ue(&self, ue_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.rlf.remove_ue(ue_id);
        inner.interruptions.remove_ue(ue_id);
    }
}

/// Labeled counter and gauge surface scraped into run reports.
#[derive(Default)]
pub struct Counters {
    pub handover_applied: AtomicU64,
    pub handover_skipped: AtomicU64,
    pub handover_suppressed: AtomicU64,
    pub rlf_events_total: AtomicU64,
    pub predictor_fallback_total: AtomicU64,
    pub worker_died: AtomicU64,
    pub validation_errors: AtomicU64,
    suppressions_by_reason: Mutex<HashMap<&'static str, u64>>,
    qos_feedback_events: Mutex<HashMap<String, u64>>,
    required_confidence_gauge: Mutex<HashMap<String, f64>>,
    prediction_confidence: Mutex<HashMap<String, (f64, u64)>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_suppression(&self, reason: &'static str) {
        self.handover_suppressed.fetch_add(1, Ordering::Relaxed);
        *self
            .suppressions_by_reason
            .lock()
            .unwrap()
            .entry(reason)
            .or_insert(0) += 1;
    }

    pub fn count_qos_feedback(&self, service_type: &str, passed: bool) {
        let key = format!(
            "{}:{}",
            service_type,
            if passed { "pass" } else { "fail" }
        );
        *self
            .qos_feedback_events
            .lock()
            .unwrap()
            .entry(key)
            .or_insert(0) += 1;
    }

    pub fn set_required_confidence(&self, service_type: &str, value: f64) {
        self.required_confidence_gauge
            .lock()
            .unwrap()
            .insert(service_type.to_string(), value);
    }

    pub fn observe_prediction_confidence(&self, antenna_id: &str, confidence: f64) {
        let mut map = self.prediction_confidence.lock().unwrap();
        let entry = map.entry(antenna_id.to_string()).or_insert((0.0, 0));
        entry.0 += confidence;
        entry.1 += 1;
    }

    pub fn suppressions(&self) -> HashMap<&'static str, u64> {
        self.suppressions_by_reason.lock().unwrap().clone()
    }

    /// JSON snapshot for run reports.
    pub fn snapshot(&self) -> serde_json::Value {
        let confidence_avg: HashMap<String, f64> = self
            .prediction_confidence
            .lock()
            .unwrap()
            .iter()
            .map(|(k, (sum, n))| (k.clone(), if *n > 0 { sum / *n as f64 } else { 0.0 }))
            .collect();
        serde_json::json!({
            "handover_decisions": {
                "applied": self.handover_applied.load(Ordering::Relaxed),
                "skipped": self.handover_skipped.load(Ordering::Relaxed),
                "suppressed": self.handover_suppressed.load(Ordering::Relaxed),
            },
            "pingpong_suppressions": self.suppressions_by_reason.lock().unwrap().clone(),
            "rlf_events_total": self.rlf_events_total.load(Ordering::Relaxed),
            "predictor_fallback_total": self.predictor_fallback_total.load(Ordering::Relaxed),
            "worker_died": self.worker_died.load(Ordering::Relaxed),
            "validation_errors": self.validation_errors.load(Ordering::Relaxed),
            "qos_feedback_events": self.qos_feedback_events.lock().unwrap().clone(),
            "adaptive_required_confidence": self.required_confidence_gauge.lock().unwrap().clone(),
            "prediction_confidence_avg": confidence_avg,
        })
    }
}
