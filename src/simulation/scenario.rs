//! Scenario loading, parsing, and validation.
//!
//! A scenario JSON file describes one topology and UE population plus the
//! full configuration surface: channel, engine, ping-pong, adaptive QoS,
//! RLF, and run parameters. Everything carries a documented default so a
//! minimal scenario only lists antennas and UE paths.

use crate::engine::EngineConfig;
use crate::metrics::RlfConfig;
use crate::network::{Antenna, RadioConfig};
use crate::pingpong::PingPongConfig;
use crate::qos::QosProfile;
use crate::qos::adaptive::AdaptiveQosConfig;
use anyhow::Context;
use serde::Deserialize;
use std::fs;

use super::types::MAX_UE_COUNT;

/// Error type for scenario loading failures.
#[derive(Debug)]
pub enum ScenarioLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ScenarioLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            ScenarioLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioLoadError {}

fn default_tick() -> f64 {
    1.0
}
fn default_duration() -> f64 {
    120.0
}
fn default_seed() -> u64 {
    42
}
fn default_speed_percent() -> u32 {
    10_000
}

/// Pacing and seeding for one run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Simulated seconds per tick.
    #[serde(default = "default_tick")]
    pub tick_seconds: f64,
    /// Simulated run length.
    #[serde(default = "default_duration")]
    pub duration_s: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Virtual-clock speed relative to wall clock, in percent.
    #[serde(default = "default_speed_percent")]
    pub speed_percent: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick(),
            duration_s: default_duration(),
            seed: default_seed(),
            speed_percent: default_speed_percent(),
        }
    }
}

/// Discrete speed profiles from the mobility library: waypoints are one
/// base-speed meter apart, so the step count is meters per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedProfile {
    #[default]
    Low,
    High,
}

impl SpeedProfile {
    pub fn step(&self) -> usize {
        match self {
            SpeedProfile::Low => 1,
            SpeedProfile::High => 10,
        }
    }
}

fn default_nearest_confidence() -> f64 {
    0.9
}

/// Which predictor implementation the run uses in ML mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorConfig {
    /// In-process nearest-antenna baseline.
    Nearest {
        #[serde(default = "default_nearest_confidence")]
        confidence: f64,
    },
    /// External prediction service; endpoint settings in a TOML file.
    Remote { config_path: String },
}

impl Default for PredictorConfig {
    fn default() -> Self {
        PredictorConfig::Nearest {
            confidence: default_nearest_confidence(),
        }
    }
}

/// An external-id alias for an antenna.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub canonical: String,
}

/// One UE's plan in the scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct UeConfig {
    pub ue_id: String,
    /// Waypoints walked cyclically, one per base-speed meter.
    pub path: Vec<(f64, f64, f64)>,
    #[serde(default)]
    pub speed_profile: SpeedProfile,
    #[serde(default)]
    pub qos_profile: Option<QosProfile>,
}

/// Root structure of a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pingpong: PingPongConfig,
    #[serde(default)]
    pub adaptive_qos: AdaptiveQosConfig,
    #[serde(default)]
    pub rlf: RlfConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    pub antennas: Vec<Antenna>,
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
    pub ues: Vec<UeConfig>,
}

/// Load and validate a scenario from a file.
pub fn load_scenario(path: &str) -> Result<Scenario, ScenarioLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| ScenarioLoadError::FileReadError(e.to_string()))?;

    let scenario: Scenario = serde_json::from_str(&data)
        .context("Invalid JSON format")
        .map_err(|e| ScenarioLoadError::ParseError(e.to_string()))?;

    validate_scenario(&scenario).map_err(ScenarioLoadError::ValidationError)?;

    Ok(scenario)
}

/// Validate scenario configuration.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    const MIN_TX_POWER_DBM: f64 = -30.0;
    const MAX_TX_POWER_DBM: f64 = 80.0;

    if scenario.antennas.is_empty() {
        return Err("Scenario must contain at least one antenna".to_string());
    }
    let mut antenna_ids = std::collections::HashSet::new();
    for antenna in &scenario.antennas {
        if antenna.id.is_empty() {
            return Err("Antenna id must not be empty".to_string());
        }
        if !antenna_ids.insert(antenna.id.clone()) {
            return Err(format!("Duplicate antenna id: {}", antenna.id));
        }
        if antenna.tx_power_dbm < MIN_TX_POWER_DBM || antenna.tx_power_dbm > MAX_TX_POWER_DBM {
            return Err(format!(
                "Antenna {} tx_power {} dBm outside realistic range ({} to {} dBm)",
                antenna.id, antenna.tx_power_dbm, MIN_TX_POWER_DBM, MAX_TX_POWER_DBM
            ));
        }
        if let Some(f_ghz) = antenna.carrier_frequency_ghz {
            if f_ghz <= 0.0 {
                return Err(format!("Antenna {} has non-positive carrier frequency", antenna.id));
            }
        }
    }

    for alias in &scenario.aliases {
        if !antenna_ids.contains(&alias.canonical) {
            return Err(format!(
                "Alias {} points at unknown antenna {}",
                alias.alias, alias.canonical
            ));
        }
    }

    if scenario.ues.is_empty() {
        return Err("Scenario must contain at least one UE".to_string());
    }
    if scenario.ues.len() > MAX_UE_COUNT {
        return Err(format!(
            "UE count {} exceeds worker pool size {}",
            scenario.ues.len(),
            MAX_UE_COUNT
        ));
    }
    let mut ue_ids = std::collections::HashSet::new();
    for ue in &scenario.ues {
        if ue.ue_id.is_empty() {
            return Err("UE id must not be empty".to_string());
        }
        if !ue_ids.insert(ue.ue_id.clone()) {
            return Err(format!("Duplicate ue_id: {}", ue.ue_id));
        }
        if ue.path.is_empty() {
            return Err(format!("UE {} has an empty path", ue.ue_id));
        }
        if let Some(profile) = &ue.qos_profile {
            if !(1..=10).contains(&profile.service_priority) {
                return Err(format!(
                    "UE {} service_priority {} outside 1-10",
                    ue.ue_id, profile.service_priority
                ));
            }
        }
    }

    if scenario.radio.sigma_sf < 0.0 {
        return Err("sigma_sf must be non-negative".to_string());
    }
    if scenario.radio.decorr_distance_m <= 0.0 {
        return Err("decorr_distance_m must be positive".to_string());
    }
    if scenario.radio.resource_blocks == 0 {
        return Err("resource_blocks must be positive".to_string());
    }

    if scenario.run.tick_seconds <= 0.0 {
        return Err("tick_seconds must be positive".to_string());
    }
    if scenario.run.duration_s <= 0.0 {
        return Err("duration_s must be positive".to_string());
    }

    if scenario.engine.hysteresis_db < 0.0 {
        return Err("hysteresis_db must be non-negative".to_string());
    }
    if scenario.engine.ttt_seconds < 0.0 {
        return Err("ttt_seconds must be non-negative".to_string());
    }

    if let PredictorConfig::Nearest { confidence } = &scenario.predictor {
        if !(0.0..=1.0).contains(confidence) {
            return Err(format!("predictor confidence {} outside [0, 1]", confidence));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "antennas": [
                {"id": "a1", "position": [0.0, 0.0, 25.0]},
                {"id": "a2", "position": [1000.0, 0.0, 25.0]}
            ],
            "ues": [
                {"ue_id": "ue001", "path": [[100.0, 0.0, 1.5], [200.0, 0.0, 1.5]]}
            ]
        })
    }

    fn parse(value: serde_json::Value) -> Scenario {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn minimal_scenario_gets_all_defaults() {
        let scenario = parse(minimal_json());
        validate_scenario(&scenario).unwrap();
        assert_eq!(scenario.radio.sigma_sf, 4.0);
        assert_eq!(scenario.radio.decorr_distance_m, 37.0);
        assert_eq!(scenario.radio.noise_floor_dbm, -100.0);
        assert_eq!(scenario.radio.resource_blocks, 50);
        assert_eq!(scenario.pingpong.min_handover_interval_s, 2.0);
        assert_eq!(scenario.pingpong.max_handovers_per_minute, 3);
        assert_eq!(scenario.rlf.rlf_threshold_db, -6.0);
        assert_eq!(scenario.rlf.interruption_queue_cap, 20);
        assert_eq!(scenario.run.tick_seconds, 1.0);
        assert_eq!(scenario.run.seed, 42);
        assert_eq!(scenario.engine.min_antennas_ml, 3);
        assert_eq!(scenario.engine.reevaluation_interval_s, 3.0);
    }

    #[test]
    fn duplicate_antenna_ids_are_rejected() {
        let mut json = minimal_json();
        json["antennas"][1]["id"] = "a1".into();
        let scenario = parse(json);
        assert!(validate_scenario(&scenario).unwrap_err().contains("Duplicate antenna"));
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut json = minimal_json();
        json["ues"][0]["path"] = serde_json::json!([]);
        let scenario = parse(json);
        assert!(validate_scenario(&scenario).unwrap_err().contains("empty path"));
    }

    #[test]
    fn alias_to_unknown_antenna_is_rejected() {
        let mut json = minimal_json();
        json["aliases"] = serde_json::json!([{"alias": "cell-9", "canonical": "a9"}]);
        let scenario = parse(json);
        assert!(validate_scenario(&scenario).unwrap_err().contains("unknown antenna"));
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let mut json = minimal_json();
        json["ues"][0]["qos_profile"] = serde_json::json!({
            "service_type": "urllc",
            "service_priority": 11
        });
        let scenario = parse(json);
        assert!(validate_scenario(&scenario).unwrap_err().contains("service_priority"));
    }

    #[test]
    fn speed_profiles_parse_and_step() {
        let mut json = minimal_json();
        json["ues"][0]["speed_profile"] = "high".into();
        let scenario = parse(json);
        assert_eq!(scenario.ues[0].speed_profile, SpeedProfile::High);
        assert_eq!(scenario.ues[0].speed_profile.step(), 10);
        assert_eq!(SpeedProfile::Low.step(), 1);
    }

    #[test]
    fn predictor_config_parses_both_kinds() {
        let mut json = minimal_json();
        json["predictor"] = serde_json::json!({"kind": "nearest", "confidence": 0.6});
        let scenario = parse(json);
        match scenario.predictor {
            PredictorConfig::Nearest { confidence } => assert_eq!(confidence, 0.6),
            _ => panic!("expected nearest predictor"),
        }

        let mut json = minimal_json();
        json["predictor"] =
            serde_json::json!({"kind": "remote", "config_path": "scenarios/predictor.toml"});
        let scenario = parse(json);
        assert!(matches!(scenario.predictor, PredictorConfig::Remote { .. }));
    }
}
