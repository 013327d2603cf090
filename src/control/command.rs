//! Wire payload definitions for the prediction and feedback contracts.

use crate::network::FeatureVector;
use crate::qos::{QosMetrics, QosProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-antenna RF measurements in a predict request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfMetricsEntry {
    pub rsrp: f64,
    pub sinr: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsrq: Option<f64>,
}

/// Request body for the prediction service.
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub ue_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<(f64, f64, f64)>,
    pub connected_to: Option<String>,
    /// BTreeMap keeps the serialized antenna order stable.
    pub rf_metrics: BTreeMap<String, RfMetricsEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos_requirements: Option<QosProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_priority: Option<u8>,
}

impl PredictRequest {
    /// Flatten a feature vector into the request shape the service expects.
    pub fn from_feature_vector(fv: &FeatureVector) -> Self {
        let mut rf_metrics = BTreeMap::new();
        for (antenna_id, rsrp) in &fv.neighbor_rsrp_dbm {
            rf_metrics.insert(
                antenna_id.clone(),
                RfMetricsEntry {
                    rsrp: *rsrp,
                    sinr: fv.sinr_of(antenna_id).unwrap_or(f64::NEG_INFINITY),
                    rsrq: fv.rsrq_of(antenna_id),
                },
            );
        }
        Self {
            ue_id: fv.ue_id.clone(),
            latitude: fv.position.0,
            longitude: fv.position.1,
            speed: fv.speed_mps,
            direction: None,
            connected_to: fv.connected_to.clone(),
            rf_metrics,
            qos_requirements: fv.qos_profile.clone(),
            service_type: fv
                .qos_profile
                .as_ref()
                .map(|p| p.service_type.as_str().to_string()),
            service_priority: fv.qos_profile.as_ref().map(|p| p.service_priority),
        }
    }
}

/// Response body from the prediction service.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    pub ue_id: String,
    /// Either field name is accepted; services differ.
    #[serde(default)]
    pub predicted_antenna: Option<String>,
    #[serde(default)]
    pub antenna_id: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub features_used: Vec<String>,
    #[serde(default)]
    pub qos_compliance: Option<serde_json::Value>,
}

impl PredictResponse {
    pub fn target(&self) -> Option<&str> {
        self.predicted_antenna
            .as_deref()
            .or(self.antenna_id.as_deref())
    }
}

/// Inbound QoS feedback message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosFeedback {
    pub ue_id: String,
    pub antenna_id: String,
    pub service_type: String,
    #[serde(default)]
    pub service_priority: Option<u8>,
    pub observed_qos: QosMetrics,
    pub success: bool,
    pub confidence: f64,
    #[serde(default)]
    pub qos_requirements: Option<QosProfile>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Acknowledgement for accepted QoS feedback.
#[derive(Debug, Clone, Serialize)]
pub struct QosFeedbackAck {
    pub status: &'static str,
    pub adaptive_required_confidence: f64,
}

/// Body of the mode get/set contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeBody {
    pub mode: String,
    pub use_ml: bool,
}
