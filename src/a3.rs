//! 3GPP Event A3 condition: "neighbor becomes offset better than serving".
//!
//! The rule here is a pure comparison; time-to-trigger clocks are owned by
//! the engine per UE and per candidate, so one rule instance can serve the
//! whole topology.

use serde::Deserialize;

/// Which measurement drives the A3 comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum A3EvaluationMode {
    /// `target.rsrp - serving.rsrp > hysteresis`
    #[default]
    RsrpBased,
    /// `target.rsrq - serving.rsrq > hysteresis`
    RsrqBased,
    /// RSRP condition plus an absolute RSRQ floor on the target.
    Mixed,
}

/// Measurements of one cell as seen by the UE.
#[derive(Debug, Clone, Copy)]
pub struct CellMetrics {
    pub rsrp_dbm: f64,
    pub rsrq_db: f64,
}

#[derive(Debug)]
pub enum A3ConfigError {
    NegativeHysteresis(f64),
    NegativeTtt(f64),
}

impl std::fmt::Display for A3ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            A3ConfigError::NegativeHysteresis(v) => {
                write!(f, "hysteresis_db must be non-negative, got {}", v)
            }
            A3ConfigError::NegativeTtt(v) => {
                write!(f, "ttt_seconds must be non-negative, got {}", v)
            }
        }
    }
}

impl std::error::Error for A3ConfigError {}

/// Event A3 rule parameters. Stateless: `condition_met` can be called for
/// any UE/candidate pair.
#[derive(Debug, Clone)]
pub struct A3Rule {
    hysteresis_db: f64,
    ttt_seconds: f64,
    mode: A3EvaluationMode,
    rsrq_floor_db: f64,
}

impl A3Rule {
    pub fn new(
        hysteresis_db: f64,
        ttt_seconds: f64,
        mode: A3EvaluationMode,
        rsrq_floor_db: f64,
    ) -> Result<Self, A3ConfigError> {
        if hysteresis_db < 0.0 {
            return Err(A3ConfigError::NegativeHysteresis(hysteresis_db));
        }
        if ttt_seconds < 0.0 {
            return Err(A3ConfigError::NegativeTtt(ttt_seconds));
        }
        Ok(Self {
            hysteresis_db,
            ttt_seconds,
            mode,
            rsrq_floor_db,
        })
    }

    pub fn ttt_seconds(&self) -> f64 {
        self.ttt_seconds
    }

    pub fn hysteresis_db(&self) -> f64 {
        self.hysteresis_db
    }

    /// Pure A3 condition check, no timer involvement.
    pub fn condition_met(&self, serving: CellMetrics, target: CellMetrics) -> bool {
        match self.mode {
            A3EvaluationMode::RsrpBased => target.rsrp_dbm - serving.rsrp_dbm > self.hysteresis_db,
            A3EvaluationMode::RsrqBased => target.rsrq_db - serving.rsrq_db > self.hysteresis_db,
            A3EvaluationMode::Mixed => {
                target.rsrp_dbm - serving.rsrp_dbm > self.hysteresis_db
                    && target.rsrq_db >= self.rsrq_floor_db
            }
        }
    }
}
