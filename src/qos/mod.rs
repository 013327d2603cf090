//! QoS types and subsystems: synthetic observed metrics, per-service-type
//! adaptive confidence thresholds, and compliance verdicts.

pub mod adaptive;
pub mod compliance;
pub mod simulator;

use serde::{Deserialize, Serialize};

/// 5G service categories, decreasing latency strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Urllc,
    Embb,
    Mmtc,
    #[default]
    Default,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Urllc => "urllc",
            ServiceType::Embb => "embb",
            ServiceType::Mmtc => "mmtc",
            ServiceType::Default => "default",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed QoS aggregate for one UE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QosMetrics {
    pub latency_ms: f64,
    pub throughput_mbps: f64,
    pub jitter_ms: f64,
    pub packet_loss_rate: f64,
}

fn default_priority() -> u8 {
    5
}

/// Declared QoS requirements for a UE's service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosProfile {
    #[serde(default)]
    pub service_type: ServiceType,
    /// 1 (lowest) to 10 (highest); clamped on use.
    #[serde(default = "default_priority")]
    pub service_priority: u8,
    #[serde(default)]
    pub latency_requirement_ms: Option<f64>,
    #[serde(default)]
    pub throughput_requirement_mbps: Option<f64>,
    #[serde(default)]
    pub reliability_pct: Option<f64>,
    /// Defaults to 10% of the latency requirement when absent.
    #[serde(default)]
    pub jitter_ms: Option<f64>,
}
