//! The predictor capability consumed by the handover engine.
//!
//! The engine owns no knowledge of how predictions are produced: any
//! implementation of `Predictor` can sit behind it, in-process or remote.
//! Two implementations ship with the simulator: a nearest-antenna baseline
//! used by the harness, and a client for the external ML service.

use crate::control::{PredictRequest, PredictionClient};
use crate::network::{FeatureVector, NetworkState};
use std::sync::Arc;

/// Output of one prediction.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub target_antenna: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub qos_compliance: Option<serde_json::Value>,
}

/// Prediction failures. Transient errors are retried once by the engine;
/// repeated failures fall back to the A3 rule.
#[derive(Debug)]
pub enum PredictorError {
    Transient(String),
    Unavailable(String),
}

impl std::fmt::Display for PredictorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictorError::Transient(msg) => write!(f, "transient predictor failure: {}", msg),
            PredictorError::Unavailable(msg) => write!(f, "predictor unavailable: {}", msg),
        }
    }
}

impl std::error::Error for PredictorError {}

/// Stateless (from the engine's perspective) prediction capability.
pub trait Predictor: Send + Sync {
    fn predict(&self, fv: &FeatureVector) -> Result<Prediction, PredictorError>;

    fn name(&self) -> &'static str {
        "predictor"
    }
}

/// Baseline predictor: always proposes the geometrically nearest antenna
/// with a fixed confidence. Used for paired experiments against A3 and as
/// the stand-in when no external service is configured.
pub struct NearestAntennaPredictor {
    state: Arc<NetworkState>,
    confidence: f64,
}

impl NearestAntennaPredictor {
    pub fn new(state: Arc<NetworkState>, confidence: f64) -> Self {
        Self {
            state,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl Predictor for NearestAntennaPredictor {
    fn predict(&self, fv: &FeatureVector) -> Result<Prediction, PredictorError> {
        Ok(Prediction {
            target_antenna: self.state.nearest_antenna(fv.position),
            confidence: self.confidence,
            qos_compliance: None,
        })
    }

    fn name(&self) -> &'static str {
        "nearest-antenna"
    }
}

/// Predictor backed by the external ML service over HTTP.
pub struct RemotePredictor {
    client: PredictionClient,
}

impl RemotePredictor {
    pub fn new(client: PredictionClient) -> Self {
        Self { client }
    }
}

impl Predictor for RemotePredictor {
    fn predict(&self, fv: &FeatureVector) -> Result<Prediction, PredictorError> {
        let request = PredictRequest::from_feature_vector(fv);
        let response = self
            .client
            .predict(&request)
            .map_err(PredictorError::Transient)?;
        Ok(Prediction {
            target_antenna: response.target().map(str::to_string),
            confidence: response.confidence.clamp(0.0, 1.0),
            qos_compliance: response.qos_compliance.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Antenna, RadioConfig, UeState};
    use crate::pingpong::PingPongTracker;
    use crate::reproducibility::RngRegistry;

    fn antenna(id: &str, x: f64) -> Antenna {
        Antenna {
            id: id.to_string(),
            position: (x, 0.0, 0.0),
            tx_power_dbm: 43.0,
            height_m: 25.0,
            azimuth_deg: 0.0,
            tilt_deg: 0.0,
            frequency_band: None,
            carrier_frequency_ghz: None,
            coverage_radius_m: 2000.0,
        }
    }

    #[test]
    fn nearest_antenna_predictor_follows_position() {
        let state = Arc::new(NetworkState::new(
            RadioConfig::default(),
            Arc::new(RngRegistry::new(1)),
            Arc::new(PingPongTracker::new(8)),
        ));
        state.register_antenna(antenna("a1", 0.0));
        state.register_antenna(antenna("a2", 1000.0));
        state.insert_ue(
            "ue001",
            UeState {
                position: (900.0, 0.0, 0.0),
                connected_to: Some("a1".into()),
                ..UeState::default()
            },
        );
        let predictor = NearestAntennaPredictor::new(Arc::clone(&state), 0.6);
        let fv = state.feature_vector("ue001", 0.0).unwrap();
        let prediction = predictor.predict(&fv).unwrap();
        assert_eq!(prediction.target_antenna.as_deref(), Some("a2"));
        assert!((prediction.confidence - 0.6).abs() < 1e-12);
    }
}
