//! Adaptive required-confidence thresholds per service type.
//!
//! Tracks an exponentially weighted breach rate per service type from QoS
//! feedback and shifts the confidence a handover prediction must reach:
//! high breach rates tighten the gate, sustained compliance relaxes it.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

fn default_alpha() -> f64 {
    0.2
}
fn default_boost_factor() -> f64 {
    0.3
}
fn default_relax_factor() -> f64 {
    0.2
}
fn default_max_boost() -> f64 {
    0.2
}
fn default_max_relax() -> f64 {
    0.1
}
fn default_high_threshold() -> f64 {
    0.3
}
fn default_low_threshold() -> f64 {
    0.1
}

/// EWMA and adjustment parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveQosConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_boost_factor")]
    pub boost_factor: f64,
    #[serde(default = "default_relax_factor")]
    pub relax_factor: f64,
    #[serde(default = "default_max_boost")]
    pub max_boost: f64,
    #[serde(default = "default_max_relax")]
    pub max_relax: f64,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
}

impl Default for AdaptiveQosConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            boost_factor: default_boost_factor(),
            relax_factor: default_relax_factor(),
            max_boost: default_max_boost(),
            max_relax: default_max_relax(),
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
        }
    }
}

/// Base required confidence for a service priority: 0.5 at priority 1,
/// rising linearly to 0.95 at priority 10.
pub fn base_confidence(priority: u8) -> f64 {
    let priority = priority.clamp(1, 10);
    0.5 + (priority - 1) as f64 * (0.45 / 9.0)
}

/// Per-service-type breach-rate state and threshold computation.
pub struct AdaptiveQosThresholds {
    config: AdaptiveQosConfig,
    breach_rates: Mutex<HashMap<String, f64>>,
}

impl AdaptiveQosThresholds {
    pub fn new(config: AdaptiveQosConfig) -> Self {
        Self {
            config,
            breach_rates: Mutex::new(HashMap::new()),
        }
    }

    fn normalize(service_type: &str) -> String {
        let lowered = service_type.trim().to_lowercase();
        if lowered.is_empty() {
            "default".to_string()
        } else {
            lowered
        }
    }

    /// Feed one pass/fail QoS outcome into the EWMA for the service type.
    /// The first sample initializes the rate directly.
    pub fn observe_feedback(&self, service_type: &str, passed: bool) {
        let service = Self::normalize(service_type);
        let sample = if passed { 0.0 } else { 1.0 };
        let alpha = self.config.alpha.clamp(0.01, 1.0);

        let mut rates = self.breach_rates.lock().unwrap();
        match rates.get_mut(&service) {
            Some(rate) => *rate = (1.0 - alpha) * *rate + alpha * sample,
            None => {
                rates.insert(service, sample);
            }
        }
    }

    /// Current breach rate for a service type, if any feedback was seen.
    pub fn breach_rate(&self, service_type: &str) -> Option<f64> {
        let service = Self::normalize(service_type);
        self.breach_rates.lock().unwrap().get(&service).copied()
    }

    /// Required confidence for a prediction serving this service type and
    /// priority, after adaptive boost or relaxation.
    pub fn required_confidence(&self, service_type: &str, priority: u8) -> f64 {
        let base = base_confidence(priority);
        let Some(rate) = self.breach_rate(service_type) else {
            return base;
        };

        if rate >= self.config.high_threshold {
            let boost = (rate * self.config.boost_factor).min(self.config.max_boost);
            (base + boost).min(0.99)
        } else if rate <= self.config.low_threshold {
            let relax = ((self.config.low_threshold - rate) * self.config.relax_factor)
                .min(self.config.max_relax);
            (base - relax).max(0.5)
        } else {
            base
        }
    }

    pub fn reset(&self) {
        self.breach_rates.lock().unwrap().clear();
    }
}
