//! Synthetic QoS metric generator.
//!
//! Produces observed latency/jitter/throughput/loss from the serving cell's
//! RF quality, its load, and the UE speed. The goal is not physical
//! fidelity: metrics must react sensibly to RF and congestion changes so
//! the decision layers have a meaningful QoS signal to trade against.

use crate::qos::QosMetrics;
use crate::reproducibility::SharedRng;
use rand::Rng;

/// Latency/throughput envelope of the simulated service.
#[derive(Debug, Clone)]
pub struct QosSimulator {
    base_latency_ms: f64,
    min_latency_ms: f64,
    max_latency_ms: f64,
    max_throughput_mbps: f64,
}

impl Default for QosSimulator {
    fn default() -> Self {
        Self {
            base_latency_ms: 12.0,
            min_latency_ms: 4.0,
            max_latency_ms: 80.0,
            max_throughput_mbps: 400.0,
        }
    }
}

impl QosSimulator {
    /// Estimate observed QoS for a UE attached to a cell with the given
    /// serving RSRP, cell load (attached UE count) and UE speed. Noise is
    /// drawn from the UE's own generator so results stay reproducible per
    /// UE regardless of worker scheduling.
    pub fn estimate(
        &self,
        serving_rsrp_dbm: f64,
        serving_load: u32,
        speed_mps: f64,
        rng: &SharedRng,
    ) -> QosMetrics {
        // Normalize RSRP (-120 dBm worst, -50 best) into [0, 1].
        let quality = ((serving_rsrp_dbm + 120.0) / 70.0).clamp(0.0, 1.0);

        // Load >= 10 attached UEs is treated as heavy congestion.
        let load_penalty = (serving_load as f64 / 10.0).min(2.0);
        let speed_penalty = (speed_mps / 30.0).min(1.5);

        let latency = (self.base_latency_ms - quality * 6.0
            + load_penalty * 5.0
            + speed_penalty * 3.0)
            .clamp(self.min_latency_ms, self.max_latency_ms);

        let throughput = (self.max_throughput_mbps * quality / (1.0 + load_penalty)).max(5.0);

        let jitter = (1.0 + (1.0 - quality) * 8.0 + load_penalty * 2.0).clamp(0.5, 50.0);

        let packet_loss = ((1.0 - quality) * 4.0 + load_penalty * 1.5).clamp(0.0, 20.0);

        let mut rng = rng.lock().unwrap();
        let jitter = jitter * (1.0 + rng.gen_range(-0.1..=0.1));
        let latency = latency * (1.0 + rng.gen_range(-0.05..=0.05));
        let throughput = throughput * (1.0 + rng.gen_range(-0.05..=0.05));
        let packet_loss = (packet_loss * (1.0 + rng.gen_range(-0.1..=0.1))).max(0.0);

        QosMetrics {
            latency_ms: latency,
            throughput_mbps: throughput,
            jitter_ms: jitter,
            packet_loss_rate: packet_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reproducibility::RngRegistry;

    fn estimate(rsrp: f64, load: u32, speed: f64) -> QosMetrics {
        let registry = RngRegistry::new(42);
        QosSimulator::default().estimate(rsrp, load, speed, &registry.rng_for("ue001"))
    }

    #[test]
    fn good_rf_yields_low_latency_high_throughput() {
        let qos = estimate(-55.0, 0, 0.0);
        assert!(qos.latency_ms < 10.0, "latency {}", qos.latency_ms);
        assert!(qos.throughput_mbps > 300.0, "throughput {}", qos.throughput_mbps);
        assert!(qos.packet_loss_rate < 1.0);
    }

    #[test]
    fn poor_rf_degrades_all_metrics() {
        let good = estimate(-60.0, 0, 0.0);
        let bad = estimate(-118.0, 0, 0.0);
        assert!(bad.latency_ms > good.latency_ms);
        assert!(bad.throughput_mbps < good.throughput_mbps);
        assert!(bad.jitter_ms > good.jitter_ms);
        assert!(bad.packet_loss_rate > good.packet_loss_rate);
    }

    #[test]
    fn congestion_penalty_is_capped() {
        let heavy = estimate(-70.0, 20, 0.0);
        let extreme = estimate(-70.0, 200, 0.0);
        // Both sit at the cap; only the noise differs.
        assert!((heavy.latency_ms - extreme.latency_ms).abs() / heavy.latency_ms < 0.11);
    }

    #[test]
    fn throughput_never_drops_below_floor() {
        let qos = estimate(-120.0, 200, 50.0);
        assert!(qos.throughput_mbps >= 5.0 * 0.95);
    }

    #[test]
    fn estimates_are_reproducible_per_ue() {
        let run = || {
            let registry = RngRegistry::new(7);
            let rng = registry.rng_for("ue001");
            let sim = QosSimulator::default();
            (0..10)
                .map(|i| sim.estimate(-80.0 - i as f64, 3, 5.0, &rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
