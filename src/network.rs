//! Network state: antenna registry, per-UE state, feature vectors, and the
//! handover event history.
//!
//! One mutex guards the whole state; the map is read far more than written.
//! Per-UE channel models are owned by the UE workers and enter this module
//! only as `ChannelSnapshot` values, so feature-vector assembly never
//! touches another task's mutable state.

use crate::channel::ChannelSnapshot;
use crate::mobility::Kinematics;
use crate::pingpong::PingPongTracker;
use crate::qos::simulator::QosSimulator;
use crate::qos::{QosMetrics, QosProfile};
use crate::reproducibility::RngRegistry;
use crate::signal::{PathLossModel, dbm_to_mw};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Bounded ring of handover events kept for inspection and reports.
const HANDOVER_HISTORY_CAPACITY: usize = 10_000;

/// Observed-QoS samples retained per UE for the rolling aggregate.
const QOS_WINDOW_CAPACITY: usize = 20;

fn default_sigma_sf() -> f64 {
    4.0
}
fn default_decorr() -> f64 {
    37.0
}
fn default_carrier_ghz() -> f64 {
    3.5
}
fn default_noise_floor() -> f64 {
    -100.0
}
fn default_resource_blocks() -> u32 {
    50
}

/// Channel and measurement configuration shared by all UEs.
#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    /// Shadow fading standard deviation in dB; 0 disables shadowing.
    #[serde(default = "default_sigma_sf")]
    pub sigma_sf: f64,
    /// AR(1) shadowing decorrelation distance in meters (urban macro).
    #[serde(default = "default_decorr")]
    pub decorr_distance_m: f64,
    /// Default carrier frequency for antennas that do not override it.
    #[serde(default = "default_carrier_ghz")]
    pub carrier_frequency_ghz: f64,
    /// Thermal noise floor in dBm.
    #[serde(default = "default_noise_floor")]
    pub noise_floor_dbm: f64,
    /// Resource blocks in the RSRQ calculation.
    #[serde(default = "default_resource_blocks")]
    pub resource_blocks: u32,
    #[serde(default)]
    pub path_loss: PathLossModel,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            sigma_sf: default_sigma_sf(),
            decorr_distance_m: default_decorr(),
            carrier_frequency_ghz: default_carrier_ghz(),
            noise_floor_dbm: default_noise_floor(),
            resource_blocks: default_resource_blocks(),
            path_loss: PathLossModel::default(),
        }
    }
}

fn default_height() -> f64 {
    25.0
}
fn default_tx_power() -> f64 {
    43.0
}
fn default_coverage_radius() -> f64 {
    2000.0
}

/// One antenna site. Immutable after registration.
#[derive(Debug, Clone, Deserialize)]
pub struct Antenna {
    pub id: String,
    /// (x, y, z) in meters.
    pub position: (f64, f64, f64),
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,
    #[serde(default = "default_height")]
    pub height_m: f64,
    #[serde(default)]
    pub azimuth_deg: f64,
    #[serde(default)]
    pub tilt_deg: f64,
    #[serde(default)]
    pub frequency_band: Option<String>,
    /// Overrides the radio config default when set.
    #[serde(default)]
    pub carrier_frequency_ghz: Option<f64>,
    #[serde(default = "default_coverage_radius")]
    pub coverage_radius_m: f64,
}

impl Antenna {
    fn distance_to(&self, position: (f64, f64, f64)) -> f64 {
        let dx = self.position.0 - position.0;
        let dy = self.position.1 - position.1;
        let dz = self.position.2 - position.2;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A `(timestamp, position)` trajectory sample.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrajectoryPoint {
    pub t_s: f64,
    pub position: (f64, f64, f64),
}

/// Mutable per-UE state held by the manager.
#[derive(Debug, Clone, Default)]
pub struct UeState {
    pub position: (f64, f64, f64),
    pub speed_mps: f64,
    pub connected_to: Option<String>,
    pub kinematics: Kinematics,
    pub trajectory: Vec<TrajectoryPoint>,
    pub qos_profile: Option<QosProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverOutcome {
    Applied,
    Skipped,
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    TooRecent,
    TooMany,
    ImmediateReturn,
    LowConfidence,
    UnknownTarget,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::TooRecent => "too_recent",
            SuppressionReason::TooMany => "too_many",
            SuppressionReason::ImmediateReturn => "immediate_return",
            SuppressionReason::LowConfidence => "low_confidence",
            SuppressionReason::UnknownTarget => "unknown_target",
        }
    }
}

/// One handover decision record.
#[derive(Debug, Clone, Serialize)]
pub struct HandoverEvent {
    pub ue_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub timestamp_s: f64,
    pub outcome: HandoverOutcome,
    pub suppression_reason: Option<SuppressionReason>,
    pub confidence: f64,
    pub required_confidence: f64,
}

/// Per-UE, per-tick measurement snapshot handed to the decision layers.
/// Neighbor maps are ordered by RSRP, strongest first.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub ue_id: String,
    pub position: (f64, f64, f64),
    pub speed_mps: f64,
    pub connected_to: Option<String>,
    pub neighbor_rsrp_dbm: Vec<(String, f64)>,
    pub neighbor_sinr_db: Vec<(String, f64)>,
    pub neighbor_rsrq_db: Vec<(String, f64)>,
    pub neighbor_cell_load: Vec<(String, u32)>,
    pub kinematics: Kinematics,
    pub time_since_last_handover_s: f64,
    pub handovers_last_minute: u32,
    pub observed_qos: Option<QosMetrics>,
    pub qos_profile: Option<QosProfile>,
}

impl FeatureVector {
    fn lookup(map: &[(String, f64)], id: &str) -> Option<f64> {
        map.iter().find(|(aid, _)| aid == id).map(|(_, v)| *v)
    }

    pub fn rsrp_of(&self, antenna_id: &str) -> Option<f64> {
        Self::lookup(&self.neighbor_rsrp_dbm, antenna_id)
    }

    pub fn sinr_of(&self, antenna_id: &str) -> Option<f64> {
        Self::lookup(&self.neighbor_sinr_db, antenna_id)
    }

    pub fn rsrq_of(&self, antenna_id: &str) -> Option<f64> {
        Self::lookup(&self.neighbor_rsrq_db, antenna_id)
    }

    /// RSRP/RSRQ pair for one antenna, for A3 evaluation.
    pub fn cell_metrics(&self, antenna_id: &str) -> Option<crate::a3::CellMetrics> {
        Some(crate::a3::CellMetrics {
            rsrp_dbm: self.rsrp_of(antenna_id)?,
            rsrq_db: self.rsrq_of(antenna_id)?,
        })
    }

    /// Serving-cell SINR, or `-inf` when not attached.
    pub fn serving_sinr_db(&self) -> f64 {
        self.connected_to
            .as_deref()
            .and_then(|id| self.sinr_of(id))
            .unwrap_or(f64::NEG_INFINITY)
    }
}

#[derive(Debug)]
pub enum StateError {
    UnknownUe(String),
    UnknownAntenna(String),
    NoTrajectory(String),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::UnknownUe(id) => write!(f, "UE {} not found", id),
            StateError::UnknownAntenna(id) => write!(f, "antenna {} unknown", id),
            StateError::NoTrajectory(id) => write!(f, "no trajectory recorded for UE {}", id),
        }
    }
}

impl std::error::Error for StateError {}

struct StateInner {
    /// BTreeMap so interference sums iterate in a fixed order.
    antennas: BTreeMap<String, Antenna>,
    aliases: HashMap<String, String>,
    ues: HashMap<String, UeState>,
    channel_snapshots: HashMap<String, ChannelSnapshot>,
    qos_windows: HashMap<String, VecDeque<QosMetrics>>,
    handover_log: VecDeque<HandoverEvent>,
}

/// Thread-safe network state manager.
pub struct NetworkState {
    config: RadioConfig,
    inner: Mutex<StateInner>,
    qos_simulator: QosSimulator,
    rng_registry: Arc<RngRegistry>,
    pingpong: Arc<PingPongTracker>,
}

impl NetworkState {
    pub fn new(
        config: RadioConfig,
        rng_registry: Arc<RngRegistry>,
        pingpong: Arc<PingPongTracker>,
    ) -> Self {
        Self {
            config,
            inner: Mutex::new(StateInner {
                antennas: BTreeMap::new(),
                aliases: HashMap::new(),
                ues: HashMap::new(),
                channel_snapshots: HashMap::new(),
                qos_windows: HashMap::new(),
                handover_log: VecDeque::new(),
            }),
            qos_simulator: QosSimulator::default(),
            rng_registry,
            pingpong,
        }
    }

    pub fn radio_config(&self) -> &RadioConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Register an antenna; no-op when the id is already present.
    pub fn register_antenna(&self, antenna: Antenna) {
        let mut inner = self.inner.lock().unwrap();
        if inner.antennas.contains_key(&antenna.id) {
            log::debug!("Antenna {} already registered", antenna.id);
            return;
        }
        log::info!(
            "Registered antenna {} at ({:.1}, {:.1}, {:.1}), {:.1} dBm",
            antenna.id,
            antenna.position.0,
            antenna.position.1,
            antenna.position.2,
            antenna.tx_power_dbm
        );
        inner.antennas.insert(antenna.id.clone(), antenna);
    }

    /// Register an alternative identifier for a known antenna. Aliases are
    /// matched case-insensitively at resolution time.
    pub fn register_alias(&self, alias: &str, canonical: &str) {
        if alias.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .aliases
            .insert(alias.to_string(), canonical.to_string());
        inner
            .aliases
            .insert(alias.to_lowercase(), canonical.to_string());
    }

    fn resolve_locked(inner: &StateInner, antenna_id: &str) -> String {
        if inner.antennas.contains_key(antenna_id) {
            return antenna_id.to_string();
        }
        if let Some(canonical) = inner.aliases.get(antenna_id) {
            if inner.antennas.contains_key(canonical) {
                return canonical.clone();
            }
        }
        let lowered = antenna_id.to_lowercase();
        if let Some(canonical) = inner.aliases.get(&lowered) {
            if inner.antennas.contains_key(canonical) {
                return canonical.clone();
            }
        }
        if lowered.starts_with("antenna") {
            let digits: String = antenna_id.chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() && inner.antennas.contains_key(&digits) {
                return digits;
            }
        }
        antenna_id.to_string()
    }

    /// Canonical id for `antenna_id`, or the raw string when no alias
    /// matches.
    pub fn resolve_id(&self, antenna_id: &str) -> String {
        let inner = self.inner.lock().unwrap();
        Self::resolve_locked(&inner, antenna_id)
    }

    pub fn antenna_count(&self) -> usize {
        self.inner.lock().unwrap().antennas.len()
    }

    pub fn has_antenna(&self, antenna_id: &str) -> bool {
        self.inner.lock().unwrap().antennas.contains_key(antenna_id)
    }

    pub fn antenna_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .antennas
            .keys()
            .cloned()
            .collect()
    }

    /// Closest antenna to a position by 3-D distance.
    pub fn nearest_antenna(&self, position: (f64, f64, f64)) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .antennas
            .values()
            .map(|a| (a.id.clone(), a.distance_to(position)))
            .min_by(|(_, d1), (_, d2)| d1.total_cmp(d2))
            .map(|(id, _)| id)
    }

    // ------------------------------------------------------------------
    // UE lifecycle
    // ------------------------------------------------------------------

    pub fn insert_ue(&self, ue_id: &str, state: UeState) {
        let mut inner = self.inner.lock().unwrap();
        inner.ues.insert(ue_id.to_string(), state);
    }

    /// Remove a UE and return its last known position and serving cell for
    /// persistence. Channel snapshot and QoS window are dropped with it.
    pub fn remove_ue(&self, ue_id: &str) -> Option<((f64, f64, f64), Option<String>)> {
        let mut inner = self.inner.lock().unwrap();
        inner.channel_snapshots.remove(ue_id);
        inner.qos_windows.remove(ue_id);
        inner
            .ues
            .remove(ue_id)
            .map(|ue| (ue.position, ue.connected_to))
    }

    pub fn ue_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().ues.keys().cloned().collect()
    }

    pub fn ue_state(&self, ue_id: &str) -> Option<UeState> {
        self.inner.lock().unwrap().ues.get(ue_id).cloned()
    }

    /// Update a UE's position sample for this tick.
    pub fn set_ue_position(
        &self,
        ue_id: &str,
        position: (f64, f64, f64),
        speed_mps: f64,
        kinematics: Kinematics,
    ) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        let ue = inner
            .ues
            .get_mut(ue_id)
            .ok_or_else(|| StateError::UnknownUe(ue_id.to_string()))?;
        ue.position = position;
        ue.speed_mps = speed_mps;
        ue.kinematics = kinematics;
        Ok(())
    }

    /// Publish the UE's channel state for this tick.
    pub fn update_channel_snapshot(&self, ue_id: &str, snapshot: ChannelSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        inner.channel_snapshots.insert(ue_id.to_string(), snapshot);
    }

    /// Directly set the serving cell (initial attach; not a handover).
    pub fn attach_ue(&self, ue_id: &str, antenna_id: &str) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        let resolved = Self::resolve_locked(&inner, antenna_id);
        if !inner.antennas.contains_key(&resolved) {
            return Err(StateError::UnknownAntenna(antenna_id.to_string()));
        }
        let ue = inner
            .ues
            .get_mut(ue_id)
            .ok_or_else(|| StateError::UnknownUe(ue_id.to_string()))?;
        ue.connected_to = Some(resolved);
        Ok(())
    }

    /// Interpolated position at `t_s`, clamped to the trajectory's ends.
    pub fn position_at(&self, ue_id: &str, t_s: f64) -> Result<(f64, f64, f64), StateError> {
        let inner = self.inner.lock().unwrap();
        let ue = inner
            .ues
            .get(ue_id)
            .ok_or_else(|| StateError::UnknownUe(ue_id.to_string()))?;
        if ue.trajectory.is_empty() {
            return Err(StateError::NoTrajectory(ue_id.to_string()));
        }
        let mut points = ue.trajectory.clone();
        points.sort_by(|a, b| a.t_s.total_cmp(&b.t_s));

        let first = points[0];
        let last = points[points.len() - 1];
        if t_s <= first.t_s {
            return Ok(first.position);
        }
        if t_s >= last.t_s {
            return Ok(last.position);
        }
        for pair in points.windows(2) {
            let (p0, p1) = (pair[0], pair[1]);
            if p0.t_s <= t_s && t_s <= p1.t_s {
                let span = p1.t_s - p0.t_s;
                let frac = if span > 0.0 {
                    (t_s - p0.t_s) / span
                } else {
                    0.0
                };
                return Ok((
                    p0.position.0 + frac * (p1.position.0 - p0.position.0),
                    p0.position.1 + frac * (p1.position.1 - p0.position.1),
                    p0.position.2 + frac * (p1.position.2 - p0.position.2),
                ));
            }
        }
        Ok(last.position)
    }

    // ------------------------------------------------------------------
    // Measurements
    // ------------------------------------------------------------------

    /// Assemble the per-tick feature vector for a UE.
    ///
    /// RSRP applies the UE's single channel snapshot (shadowing + fading)
    /// to every antenna; SINR treats all other antennas as interference on
    /// top of the noise floor; RSRQ follows `N_RB * S / RSSI`. All neighbor
    /// maps come back sorted by RSRP, strongest first.
    pub fn feature_vector(&self, ue_id: &str, now_s: f64) -> Result<FeatureVector, StateError> {
        let mut inner = self.inner.lock().unwrap();
        let ue = inner
            .ues
            .get(ue_id)
            .ok_or_else(|| StateError::UnknownUe(ue_id.to_string()))?
            .clone();

        let connected = ue
            .connected_to
            .as_deref()
            .map(|id| Self::resolve_locked(&inner, id));
        if connected != ue.connected_to {
            if let Some(ue_mut) = inner.ues.get_mut(ue_id) {
                ue_mut.connected_to = connected.clone();
            }
        }

        let snapshot = inner
            .channel_snapshots
            .get(ue_id)
            .copied()
            .unwrap_or_default();

        // RSRP per antenna in dBm and linear mW.
        let mut rsrp_dbm: Vec<(String, f64)> = Vec::with_capacity(inner.antennas.len());
        for (id, antenna) in &inner.antennas {
            let distance = antenna.distance_to(ue.position);
            let f_ghz = antenna
                .carrier_frequency_ghz
                .unwrap_or(self.config.carrier_frequency_ghz);
            let path_loss = self.config.path_loss.path_loss_db(distance, f_ghz);
            let rsrp =
                antenna.tx_power_dbm - path_loss - snapshot.shadowing_db - snapshot.fading_db;
            rsrp_dbm.push((id.clone(), rsrp));
        }

        let rsrp_mw: Vec<(String, f64)> = rsrp_dbm
            .iter()
            .map(|(id, dbm)| (id.clone(), dbm_to_mw(*dbm)))
            .collect();
        let noise_mw = dbm_to_mw(self.config.noise_floor_dbm);
        let total_mw: f64 = rsrp_mw.iter().map(|(_, mw)| mw).sum();

        let mut sinr_db: Vec<(String, f64)> = Vec::with_capacity(rsrp_mw.len());
        let mut rsrq_db: Vec<(String, f64)> = Vec::with_capacity(rsrp_mw.len());
        for (id, sig) in &rsrp_mw {
            let interference = total_mw - sig;
            let denom = noise_mw + interference;
            let sinr_lin = if denom > 0.0 { sig / denom } else { 0.0 };
            let sinr = if sinr_lin > 0.0 {
                10.0 * sinr_lin.log10()
            } else {
                f64::NEG_INFINITY
            };
            sinr_db.push((id.clone(), sinr));

            let rssi = sig + denom;
            let rsrq_lin = if rssi > 0.0 {
                self.config.resource_blocks as f64 * sig / rssi
            } else {
                0.0
            };
            let rsrq = if rsrq_lin > 0.0 {
                10.0 * rsrq_lin.log10()
            } else {
                f64::NEG_INFINITY
            };
            rsrq_db.push((id.clone(), rsrq));
        }

        // Load per antenna: attached UE count.
        let mut loads: BTreeMap<String, u32> =
            inner.antennas.keys().map(|id| (id.clone(), 0)).collect();
        let resolved_connections: Vec<Option<String>> = inner
            .ues
            .values()
            .map(|u| {
                u.connected_to
                    .as_deref()
                    .map(|c| Self::resolve_locked(&inner, c))
            })
            .collect();
        for conn in resolved_connections.iter().flatten() {
            if let Some(count) = loads.get_mut(conn) {
                *count += 1;
            }
        }

        // Sort everything by RSRP, strongest first.
        rsrp_dbm.sort_by(|a, b| b.1.total_cmp(&a.1));
        let order: Vec<String> = rsrp_dbm.iter().map(|(id, _)| id.clone()).collect();
        let reorder = |map: &[(String, f64)]| -> Vec<(String, f64)> {
            order
                .iter()
                .filter_map(|id| {
                    map.iter()
                        .find(|(aid, _)| aid == id)
                        .map(|(aid, v)| (aid.clone(), *v))
                })
                .collect()
        };
        let sinr_db = reorder(&sinr_db);
        let rsrq_db = reorder(&rsrq_db);
        let cell_load: Vec<(String, u32)> = order
            .iter()
            .map(|id| (id.clone(), *loads.get(id).unwrap_or(&0)))
            .collect();

        // Synthesize an observed-QoS sample for this snapshot and fold it
        // into the UE's rolling window.
        if let Some(serving) = connected.as_deref() {
            if let Some(serving_rsrp) = rsrp_dbm
                .iter()
                .find(|(id, _)| id == serving)
                .map(|(_, v)| *v)
            {
                let serving_load = cell_load
                    .iter()
                    .find(|(id, _)| id == serving)
                    .map(|(_, l)| *l)
                    .unwrap_or(0);
                let sample = self.qos_simulator.estimate(
                    serving_rsrp,
                    serving_load,
                    ue.speed_mps,
                    &self.rng_registry.rng_for(ue_id),
                );
                let window = inner.qos_windows.entry(ue_id.to_string()).or_default();
                if window.len() >= QOS_WINDOW_CAPACITY {
                    window.pop_front();
                }
                window.push_back(sample);
            }
        }
        let observed_qos = inner.qos_windows.get(ue_id).and_then(aggregate_window);

        Ok(FeatureVector {
            ue_id: ue_id.to_string(),
            position: ue.position,
            speed_mps: ue.speed_mps,
            connected_to: connected,
            neighbor_rsrp_dbm: rsrp_dbm,
            neighbor_sinr_db: sinr_db,
            neighbor_rsrq_db: rsrq_db,
            neighbor_cell_load: cell_load,
            kinematics: ue.kinematics,
            time_since_last_handover_s: self.pingpong.time_since_last(ue_id, now_s),
            handovers_last_minute: self.pingpong.handovers_in_window(ue_id, now_s, 60.0),
            observed_qos,
            qos_profile: ue.qos_profile.clone(),
        })
    }

    /// Record an externally observed QoS measurement for a UE.
    pub fn record_qos(&self, ue_id: &str, metrics: QosMetrics) {
        let mut inner = self.inner.lock().unwrap();
        let window = inner.qos_windows.entry(ue_id.to_string()).or_default();
        if window.len() >= QOS_WINDOW_CAPACITY {
            window.pop_front();
        }
        window.push_back(metrics);
    }

    pub fn observed_qos(&self, ue_id: &str) -> Option<QosMetrics> {
        let inner = self.inner.lock().unwrap();
        inner.qos_windows.get(ue_id).and_then(aggregate_window)
    }

    // ------------------------------------------------------------------
    // Handover
    // ------------------------------------------------------------------

    /// Apply a handover decision. Returns a `skipped` event when the target
    /// resolves to the current serving cell; errors on unknown entities.
    pub fn apply_handover(
        &self,
        ue_id: &str,
        target_id: &str,
        now_s: f64,
        confidence: f64,
        required_confidence: f64,
    ) -> Result<HandoverEvent, StateError> {
        let mut inner = self.inner.lock().unwrap();
        let previous = {
            let ue = inner
                .ues
                .get(ue_id)
                .ok_or_else(|| StateError::UnknownUe(ue_id.to_string()))?;
            ue.connected_to
                .as_deref()
                .map(|id| Self::resolve_locked(&inner, id))
        };

        let resolved = Self::resolve_locked(&inner, target_id);
        if Some(resolved.as_str()) == previous.as_deref() {
            log::info!(
                "Handover for {} skipped; already connected to {}",
                ue_id,
                resolved
            );
            return Ok(HandoverEvent {
                ue_id: ue_id.to_string(),
                from: previous.clone(),
                to: Some(resolved),
                timestamp_s: now_s,
                outcome: HandoverOutcome::Skipped,
                suppression_reason: None,
                confidence,
                required_confidence,
            });
        }
        if !inner.antennas.contains_key(&resolved) {
            return Err(StateError::UnknownAntenna(target_id.to_string()));
        }

        if let Some(ue) = inner.ues.get_mut(ue_id) {
            ue.connected_to = Some(resolved.clone());
        }

        let event = HandoverEvent {
            ue_id: ue_id.to_string(),
            from: previous.clone(),
            to: Some(resolved.clone()),
            timestamp_s: now_s,
            outcome: HandoverOutcome::Applied,
            suppression_reason: None,
            confidence,
            required_confidence,
        };
        push_event(&mut inner.handover_log, event.clone());
        log::info!(
            "Handover for {}: {} -> {} at t={:.2}s",
            ue_id,
            previous.as_deref().unwrap_or("-"),
            resolved,
            now_s
        );
        Ok(event)
    }

    /// Record a non-applied decision (skip or suppression) in the log.
    pub fn record_event(&self, event: HandoverEvent) {
        let mut inner = self.inner.lock().unwrap();
        push_event(&mut inner.handover_log, event);
    }

    pub fn handover_log(&self) -> Vec<HandoverEvent> {
        self.inner
            .lock()
            .unwrap()
            .handover_log
            .iter()
            .cloned()
            .collect()
    }
}

fn push_event(log: &mut VecDeque<HandoverEvent>, event: HandoverEvent) {
    if log.len() >= HANDOVER_HISTORY_CAPACITY {
        log.pop_front();
    }
    log.push_back(event);
}

fn aggregate_window(window: &VecDeque<QosMetrics>) -> Option<QosMetrics> {
    if window.is_empty() {
        return None;
    }
    let n = window.len() as f64;
    Some(QosMetrics {
        latency_ms: window.iter().map(|m| m.latency_ms).sum::<f64>() / n,
        throughput_mbps: window.iter().map(|m| m.throughput_mbps).sum::<f64>() / n,
        jitter_ms: window.iter().map(|m| m.jitter_ms).sum::<f64>() / n,
        packet_loss_rate: window.iter().map(|m| m.packet_loss_rate).sum::<f64>() / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn test_antenna(id: &str, x: f64, y: f64) -> Antenna {
        Antenna {
            id: id.to_string(),
            position: (x, y, 0.0),
            tx_power_dbm: 43.0,
            height_m: 25.0,
            azimuth_deg: 0.0,
            tilt_deg: 0.0,
            frequency_band: None,
            carrier_frequency_ghz: Some(3.5),
            coverage_radius_m: 2000.0,
        }
    }

    fn two_antenna_state() -> NetworkState {
        // Deterministic RF: shadowing disabled, no noise floor.
        let config = RadioConfig {
            sigma_sf: 0.0,
            noise_floor_dbm: f64::NEG_INFINITY,
            ..RadioConfig::default()
        };
        let registry = Arc::new(RngRegistry::new(42));
        let tracker = Arc::new(PingPongTracker::new(8));
        let state = NetworkState::new(config, registry, tracker);
        state.register_antenna(test_antenna("a1", 0.0, 0.0));
        state.register_antenna(test_antenna("a2", 1000.0, 0.0));
        state.insert_ue(
            "ue001",
            UeState {
                position: (100.0, 0.0, 0.0),
                connected_to: Some("a1".to_string()),
                ..UeState::default()
            },
        );
        state
    }

    #[test]
    fn feature_vector_orders_by_rsrp_descending() {
        let state = two_antenna_state();
        let fv = state.feature_vector("ue001", 0.0).unwrap();
        assert_eq!(fv.neighbor_rsrp_dbm[0].0, "a1");
        assert_eq!(fv.neighbor_rsrp_dbm[1].0, "a2");
        assert!(fv.neighbor_rsrp_dbm[0].1 > fv.neighbor_rsrp_dbm[1].1);
        // The SINR/RSRQ/load maps share the ordering.
        assert_eq!(fv.neighbor_sinr_db[0].0, "a1");
        assert_eq!(fv.neighbor_rsrq_db[0].0, "a1");
        assert_eq!(fv.neighbor_cell_load[0].0, "a1");
    }

    #[test]
    fn near_serving_cell_has_positive_sinr() {
        let state = two_antenna_state();
        let fv = state.feature_vector("ue001", 0.0).unwrap();
        assert!(fv.serving_sinr_db() > 0.0, "sinr {}", fv.serving_sinr_db());
        assert!(fv.rsrp_of("a1").unwrap() > fv.rsrp_of("a2").unwrap());
    }

    #[test]
    fn rsrp_matches_hand_computed_value() {
        let state = two_antenna_state();
        let fv = state.feature_vector("ue001", 0.0).unwrap();
        // 43 - (35*log10(100) + 22.4 + 20*log10(3.5)) = 43 - 103.281
        assert!((fv.rsrp_of("a1").unwrap() - (-60.281)).abs() < 0.01);
    }

    #[test]
    fn load_counts_attached_ues() {
        let state = two_antenna_state();
        state.insert_ue(
            "ue002",
            UeState {
                position: (900.0, 0.0, 0.0),
                connected_to: Some("a2".to_string()),
                ..UeState::default()
            },
        );
        state.insert_ue(
            "ue003",
            UeState {
                position: (50.0, 0.0, 0.0),
                connected_to: Some("a1".to_string()),
                ..UeState::default()
            },
        );
        let fv = state.feature_vector("ue001", 0.0).unwrap();
        let load_of = |id: &str| {
            fv.neighbor_cell_load
                .iter()
                .find(|(aid, _)| aid == id)
                .map(|(_, l)| *l)
                .unwrap()
        };
        assert_eq!(load_of("a1"), 2);
        assert_eq!(load_of("a2"), 1);
    }

    #[test]
    fn aliases_resolve_case_insensitively_and_by_digits() {
        let state = two_antenna_state();
        state.register_alias("Cell-One", "a1");
        assert_eq!(state.resolve_id("Cell-One"), "a1");
        assert_eq!(state.resolve_id("cell-one"), "a1");
        assert_eq!(state.resolve_id("nope"), "nope");

        // "antennaN" falls back to digit extraction.
        let registry = Arc::new(RngRegistry::new(1));
        let tracker = Arc::new(PingPongTracker::new(8));
        let st = NetworkState::new(RadioConfig::default(), registry, tracker);
        st.register_antenna(test_antenna("7", 0.0, 0.0));
        assert_eq!(st.resolve_id("antenna7"), "7");
    }

    #[test]
    fn apply_handover_to_current_cell_is_skipped() {
        let state = two_antenna_state();
        let event = state.apply_handover("ue001", "a1", 5.0, 1.0, 0.5).unwrap();
        assert_eq!(event.outcome, HandoverOutcome::Skipped);
        // Skips are not appended to the log by apply_handover.
        assert!(state.handover_log().is_empty());
    }

    #[test]
    fn apply_handover_switches_cell_and_logs() {
        let state = two_antenna_state();
        let event = state.apply_handover("ue001", "a2", 5.0, 0.9, 0.5).unwrap();
        assert_eq!(event.outcome, HandoverOutcome::Applied);
        assert_eq!(event.from.as_deref(), Some("a1"));
        assert_eq!(event.to.as_deref(), Some("a2"));
        assert_eq!(
            state.ue_state("ue001").unwrap().connected_to.as_deref(),
            Some("a2")
        );
        assert_eq!(state.handover_log().len(), 1);
    }

    #[test]
    fn apply_handover_to_unknown_antenna_fails() {
        let state = two_antenna_state();
        assert!(matches!(
            state.apply_handover("ue001", "a9", 5.0, 1.0, 0.5),
            Err(StateError::UnknownAntenna(_))
        ));
        assert!(matches!(
            state.apply_handover("ue404", "a2", 5.0, 1.0, 0.5),
            Err(StateError::UnknownUe(_))
        ));
    }

    #[test]
    fn trajectory_interpolation_clamps_and_interpolates() {
        let state = two_antenna_state();
        state.insert_ue(
            "ue010",
            UeState {
                trajectory: vec![
                    TrajectoryPoint {
                        t_s: 0.0,
                        position: (0.0, 0.0, 0.0),
                    },
                    TrajectoryPoint {
                        t_s: 10.0,
                        position: (100.0, 0.0, 0.0),
                    },
                ],
                ..UeState::default()
            },
        );
        assert_eq!(state.position_at("ue010", -5.0).unwrap(), (0.0, 0.0, 0.0));
        assert_eq!(state.position_at("ue010", 20.0).unwrap(), (100.0, 0.0, 0.0));
        let mid = state.position_at("ue010", 5.0).unwrap();
        assert!((mid.0 - 50.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_antenna_by_distance() {
        let state = two_antenna_state();
        assert_eq!(
            state.nearest_antenna((100.0, 0.0, 0.0)).as_deref(),
            Some("a1")
        );
        assert_eq!(
            state.nearest_antenna((900.0, 0.0, 0.0)).as_deref(),
            Some("a2")
        );
    }

    #[test]
    fn observed_qos_is_windowed_aggregate() {
        let state = two_antenna_state();
        for _ in 0..3 {
            state.feature_vector("ue001", 0.0).unwrap();
        }
        let qos = state.observed_qos("ue001").unwrap();
        assert!(qos.latency_ms >= 4.0 * 0.95 && qos.latency_ms <= 80.0 * 1.05);
        assert!(qos.throughput_mbps >= 5.0 * 0.95);
    }
}
