//! QoS compliance verdicts.
//!
//! Compares an observed QoS snapshot against declared requirements and the
//! required prediction confidence. Absent requirements auto-pass; the
//! jitter requirement falls back to 10% of the latency requirement.

use crate::qos::{QosMetrics, QosProfile};
use serde::Serialize;

/// One metric's pass/fail with the numbers behind it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCheck {
    pub passed: bool,
    pub required: f64,
    pub observed: f64,
    pub delta: f64,
}

/// A failed metric, listed in the verdict.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub metric: &'static str,
    pub required: f64,
    pub observed: f64,
    pub delta: f64,
}

/// Structured verdict for one compliance evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceVerdict {
    pub passed: bool,
    pub confidence_ok: bool,
    pub required_confidence: f64,
    pub observed_confidence: f64,
    pub latency: MetricCheck,
    pub throughput: MetricCheck,
    pub jitter: MetricCheck,
    pub reliability: MetricCheck,
    pub violations: Vec<Violation>,
}

/// Evaluate observed QoS against the declared profile.
///
/// `required_confidence` comes from the adaptive threshold manager; the
/// overall verdict passes only when every declared metric passes and
/// `confidence >= required_confidence`.
pub fn evaluate(
    profile: &QosProfile,
    observed: &QosMetrics,
    confidence: f64,
    required_confidence: f64,
) -> ComplianceVerdict {
    let latency_req = profile.latency_requirement_ms.unwrap_or(0.0);
    let throughput_req = profile.throughput_requirement_mbps.unwrap_or(0.0);
    let jitter_req = profile.jitter_ms.unwrap_or(latency_req * 0.1);
    let reliability_pct = profile.reliability_pct.unwrap_or(0.0);
    let max_loss = (100.0 - reliability_pct).max(0.0);

    let latency = MetricCheck {
        passed: latency_req <= 0.0 || observed.latency_ms <= latency_req,
        required: latency_req,
        observed: observed.latency_ms,
        delta: observed.latency_ms - latency_req,
    };
    let throughput = MetricCheck {
        passed: throughput_req <= 0.0 || observed.throughput_mbps >= throughput_req,
        required: throughput_req,
        observed: observed.throughput_mbps,
        delta: observed.throughput_mbps - throughput_req,
    };
    let jitter = MetricCheck {
        passed: jitter_req <= 0.0 || observed.jitter_ms <= jitter_req,
        required: jitter_req,
        observed: observed.jitter_ms,
        delta: observed.jitter_ms - jitter_req,
    };
    let reliability = MetricCheck {
        passed: reliability_pct <= 0.0 || observed.packet_loss_rate <= max_loss,
        required: max_loss,
        observed: observed.packet_loss_rate,
        delta: observed.packet_loss_rate - max_loss,
    };

    let mut violations = Vec::new();
    for (name, check) in [
        ("latency", &latency),
        ("throughput", &throughput),
        ("jitter", &jitter),
        ("reliability", &reliability),
    ] {
        if !check.passed {
            violations.push(Violation {
                metric: name,
                required: check.required,
                observed: check.observed,
                delta: check.delta,
            });
        }
    }

    let confidence_ok = confidence >= required_confidence;
    ComplianceVerdict {
        passed: violations.is_empty() && confidence_ok,
        confidence_ok,
        required_confidence,
        observed_confidence: confidence,
        latency,
        throughput,
        jitter,
        reliability,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::ServiceType;

    fn urllc_profile() -> QosProfile {
        QosProfile {
            service_type: ServiceType::Urllc,
            service_priority: 10,
            latency_requirement_ms: Some(10.0),
            throughput_requirement_mbps: Some(100.0),
            reliability_pct: Some(99.9),
            jitter_ms: None,
        }
    }

    fn observed(latency: f64, throughput: f64, jitter: f64, loss: f64) -> QosMetrics {
        QosMetrics {
            latency_ms: latency,
            throughput_mbps: throughput,
            jitter_ms: jitter,
            packet_loss_rate: loss,
        }
    }

    #[test]
    fn all_metrics_and_confidence_pass() {
        let verdict = evaluate(&urllc_profile(), &observed(8.0, 150.0, 0.9, 0.05), 0.97, 0.95);
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn jitter_requirement_defaults_to_tenth_of_latency() {
        let verdict = evaluate(&urllc_profile(), &observed(8.0, 150.0, 1.5, 0.05), 0.97, 0.95);
        // 1.5 ms jitter against the derived 1.0 ms requirement.
        assert!(!verdict.jitter.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].metric, "jitter");
        assert!((verdict.violations[0].delta - 0.5).abs() < 1e-12);
    }

    #[test]
    fn reliability_maps_to_max_packet_loss() {
        // 99.9% reliability allows 0.1% loss.
        let verdict = evaluate(&urllc_profile(), &observed(8.0, 150.0, 0.9, 0.2), 0.97, 0.95);
        assert!(!verdict.reliability.passed);
        assert!((verdict.reliability.required - 0.1).abs() < 1e-12);
    }

    #[test]
    fn low_confidence_fails_even_with_clean_metrics() {
        let verdict = evaluate(&urllc_profile(), &observed(8.0, 150.0, 0.9, 0.05), 0.9, 0.95);
        assert!(!verdict.passed);
        assert!(!verdict.confidence_ok);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn absent_requirements_auto_pass() {
        let profile = QosProfile {
            service_type: ServiceType::Default,
            service_priority: 1,
            latency_requirement_ms: None,
            throughput_requirement_mbps: None,
            reliability_pct: None,
            jitter_ms: None,
        };
        let verdict = evaluate(&profile, &observed(70.0, 6.0, 40.0, 15.0), 0.5, 0.5);
        assert!(verdict.passed);
    }
}
