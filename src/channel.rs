//! Per-UE channel state: AR(1) shadowing and Doppler-aware Rayleigh fading.
//!
//! Each UE's worker owns one `ChannelModel` and advances it once per tick.
//! The resulting (shadowing, fading) pair is published to the network state
//! as a snapshot; a single pair per tick is applied to all antennas when the
//! feature vector is assembled, which is the documented simplification of
//! this simulator.
//!
//! Sign convention: path loss is always positive, shadowing is a signed
//! deviation, fading loss is mean-compensated to ~0 dB. All three are
//! subtracted from TX power to obtain RSRP.

use crate::reproducibility::SharedRng;
use rand_distr::{Distribution, Normal};

/// Below this velocity a UE is treated as stationary for Doppler purposes.
pub const MIN_VELOCITY_MPS: f64 = 0.1;

/// Coherence time assigned to stationary UEs.
pub const STATIONARY_COHERENCE_TIME_S: f64 = 10.0;

const SPEED_OF_LIGHT_MPS: f64 = 3e8;

/// Numerical floor inside the fading-power logarithm.
const EPSILON: f64 = 1e-10;

/// Mean of `-10·log10(|h|²)` for unit-variance Rayleigh fading,
/// `10·γ/ln(10)` with γ the Euler-Mascheroni constant. Subtracting it makes
/// the long-run mean fading loss ~0 dB.
const RAYLEIGH_MEAN_COMPENSATION_DB: f64 = 2.5066;

/// Errors from channel arithmetic. Any non-finite intermediate is fatal for
/// the run: a silent NaN would invalidate the reproducibility guarantees.
#[derive(Debug)]
pub enum ChannelError {
    NonFinite(&'static str),
    BadSigma(f64),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NonFinite(what) => {
                write!(f, "non-finite value in channel arithmetic: {}", what)
            }
            ChannelError::BadSigma(s) => write!(f, "invalid shadowing sigma: {}", s),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Snapshot of a UE's channel published to the network state each tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelSnapshot {
    pub shadowing_db: f64,
    pub fading_db: f64,
}

/// Per-UE channel state and parameters.
pub struct ChannelModel {
    ue_id: String,
    carrier_frequency_hz: f64,
    sigma_sf: f64,
    decorr_distance_m: f64,
    rng: SharedRng,

    shadowing_db: f64,
    last_position: Option<(f64, f64, f64)>,
    /// Fading coefficient as (re, im); unit variance Rayleigh when drawn.
    fading_coefficient: (f64, f64),
    last_fading_update_s: f64,
    coherence_time_s: f64,
    initialized: bool,
}

impl ChannelModel {
    pub fn new(
        ue_id: &str,
        carrier_frequency_ghz: f64,
        sigma_sf: f64,
        decorr_distance_m: f64,
        rng: SharedRng,
    ) -> Result<Self, ChannelError> {
        if !sigma_sf.is_finite() || sigma_sf < 0.0 {
            return Err(ChannelError::BadSigma(sigma_sf));
        }
        log::debug!(
            "Channel model for UE {}: fc={:.2} GHz, sigma_sf={:.1} dB, d_corr={:.1} m",
            ue_id,
            carrier_frequency_ghz,
            sigma_sf,
            decorr_distance_m
        );
        Ok(Self {
            ue_id: ue_id.to_string(),
            carrier_frequency_hz: carrier_frequency_ghz * 1e9,
            sigma_sf,
            decorr_distance_m,
            rng,
            shadowing_db: 0.0,
            last_position: None,
            fading_coefficient: (1.0, 0.0),
            last_fading_update_s: 0.0,
            coherence_time_s: STATIONARY_COHERENCE_TIME_S,
            initialized: false,
        })
    }

    fn draw_normal(&self, sigma: f64) -> Result<f64, ChannelError> {
        if sigma == 0.0 {
            return Ok(0.0);
        }
        let normal = Normal::new(0.0, sigma).map_err(|_| ChannelError::BadSigma(sigma))?;
        let mut rng = self.rng.lock().unwrap();
        Ok(normal.sample(&mut *rng))
    }

    /// Advance the AR(1) shadowing process to a new position and return the
    /// updated shadowing value in dB.
    ///
    /// The first observation is drawn from `N(0, sigma_sf)` so the process
    /// starts in its stationary distribution. Subsequent updates use
    /// `s' = rho*s + sqrt(1-rho^2)*eps` with `rho = exp(-d/d_corr)` keyed by
    /// the Euclidean distance moved since the previous observation.
    pub fn update_shadowing(&mut self, position: (f64, f64, f64)) -> Result<f64, ChannelError> {
        let (last, initialized) = (self.last_position, self.initialized);
        if !initialized || last.is_none() {
            self.shadowing_db = self.draw_normal(self.sigma_sf)?;
            self.last_position = Some(position);
            self.initialized = true;
            log::debug!(
                "UE {}: initial shadowing {:.2} dB",
                self.ue_id,
                self.shadowing_db
            );
            return Ok(self.shadowing_db);
        }

        let last = last.unwrap();
        let dx = position.0 - last.0;
        let dy = position.1 - last.1;
        let dz = position.2 - last.2;
        let moved = (dx * dx + dy * dy + dz * dz).sqrt();

        let rho = (-moved / self.decorr_distance_m).exp();
        let innovation_scale = (1.0 - rho * rho).sqrt();
        let innovation = self.draw_normal(self.sigma_sf)?;

        let updated = rho * self.shadowing_db + innovation_scale * innovation;
        if !updated.is_finite() {
            return Err(ChannelError::NonFinite("shadowing"));
        }
        self.shadowing_db = updated;
        self.last_position = Some(position);
        Ok(self.shadowing_db)
    }

    fn regenerate_fading(&mut self) -> Result<(), ChannelError> {
        let re = self.draw_normal(1.0)?;
        let im = self.draw_normal(1.0)?;
        let inv_sqrt2 = std::f64::consts::FRAC_1_SQRT_2;
        self.fading_coefficient = (re * inv_sqrt2, im * inv_sqrt2);
        Ok(())
    }

    fn fading_loss_db(&self) -> Result<f64, ChannelError> {
        let (re, im) = self.fading_coefficient;
        let power = re * re + im * im;
        let loss = -10.0 * (power + EPSILON).log10() - RAYLEIGH_MEAN_COMPENSATION_DB;
        if !loss.is_finite() {
            return Err(ChannelError::NonFinite("fading loss"));
        }
        Ok(loss)
    }

    /// Advance the fast fading process and return the fading loss in dB.
    ///
    /// The coefficient is regenerated only when the Doppler coherence time
    /// `9/(16*pi*f_d)` has elapsed (10 s for stationary UEs), so a slow UE
    /// sees a stable channel between regenerations.
    pub fn update_fast_fading(
        &mut self,
        velocity_mps: f64,
        now_s: f64,
    ) -> Result<f64, ChannelError> {
        if velocity_mps < MIN_VELOCITY_MPS {
            self.coherence_time_s = STATIONARY_COHERENCE_TIME_S;
        } else {
            let max_doppler_hz = velocity_mps * self.carrier_frequency_hz / SPEED_OF_LIGHT_MPS;
            self.coherence_time_s = 9.0 / (16.0 * std::f64::consts::PI * max_doppler_hz);
            if !self.coherence_time_s.is_finite() {
                return Err(ChannelError::NonFinite("coherence time"));
            }
        }

        if now_s - self.last_fading_update_s >= self.coherence_time_s {
            self.regenerate_fading()?;
            self.last_fading_update_s = now_s;
            log::debug!(
                "UE {}: fading regenerated at t={:.3}s (coherence {:.4}s)",
                self.ue_id,
                now_s,
                self.coherence_time_s
            );
        }

        self.fading_loss_db()
    }

    /// Current shadowing in dB without advancing the process.
    pub fn shadowing_db(&self) -> f64 {
        self.shadowing_db
    }

    pub fn coherence_time_s(&self) -> f64 {
        self.coherence_time_s
    }

    /// Reset to the uninitialized state for a fresh run.
    pub fn reset(&mut self) {
        self.shadowing_db = 0.0;
        self.last_position = None;
        self.fading_coefficient = (1.0, 0.0);
        self.last_fading_update_s = 0.0;
        self.coherence_time_s = STATIONARY_COHERENCE_TIME_S;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reproducibility::RngRegistry;

    fn model(sigma: f64, decorr: f64) -> ChannelModel {
        let registry = RngRegistry::new(42);
        ChannelModel::new("ue001", 3.5, sigma, decorr, registry.rng_for("ue001")).unwrap()
    }

    #[test]
    fn zero_sigma_disables_shadowing() {
        let mut ch = model(0.0, 37.0);
        assert_eq!(ch.update_shadowing((0.0, 0.0, 1.5)).unwrap(), 0.0);
        assert_eq!(ch.update_shadowing((500.0, 0.0, 1.5)).unwrap(), 0.0);
    }

    #[test]
    fn shadowing_is_correlated_over_short_moves() {
        let mut ch = model(4.0, 37.0);
        let first = ch.update_shadowing((0.0, 0.0, 1.5)).unwrap();
        // 1 cm step: rho ~ 1, value barely changes.
        let second = ch.update_shadowing((0.01, 0.0, 1.5)).unwrap();
        assert!((second - first).abs() < 0.5, "{first} vs {second}");
    }

    #[test]
    fn shadowing_decorrelates_over_long_moves() {
        // Over many huge jumps the samples are fresh draws from N(0, sigma);
        // check mean ~0 and variance ~sigma^2.
        let mut ch = model(4.0, 37.0);
        let mut samples = Vec::new();
        let mut x = 0.0;
        for _ in 0..4000 {
            x += 10_000.0;
            samples.push(ch.update_shadowing((x, 0.0, 1.5)).unwrap());
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
        assert!(mean.abs() < 0.3, "mean {mean}");
        assert!((var - 16.0).abs() < 2.0, "variance {var}");
    }

    #[test]
    fn stationary_ue_regenerates_at_most_once_per_ten_seconds() {
        let mut ch = model(4.0, 37.0);
        ch.update_shadowing((0.0, 0.0, 1.5)).unwrap();
        let initial = ch.fading_coefficient;
        // First call at t=10 regenerates (10 - 0 >= 10), then the
        // coefficient must stay fixed until t=20.
        ch.update_fast_fading(0.0, 10.0).unwrap();
        let after_first = ch.fading_coefficient;
        assert_ne!(initial, after_first);
        for t in 11..20 {
            ch.update_fast_fading(0.0, t as f64).unwrap();
            assert_eq!(ch.fading_coefficient, after_first);
        }
        ch.update_fast_fading(0.0, 20.0).unwrap();
        assert_ne!(ch.fading_coefficient, after_first);
    }

    #[test]
    fn moving_ue_coherence_time_follows_doppler() {
        let mut ch = model(4.0, 37.0);
        // 30 m/s at 3.5 GHz: f_d = 30 * 3.5e9 / 3e8 = 350 Hz
        // T_c = 9 / (16*pi*350) ~ 0.5117 ms
        ch.update_fast_fading(30.0, 0.0).unwrap();
        let expected = 9.0 / (16.0 * std::f64::consts::PI * 350.0);
        assert!((ch.coherence_time_s() - expected).abs() < 1e-9);
    }

    #[test]
    fn mean_fading_loss_is_near_zero() {
        // Force a regeneration every call and average the losses; the
        // compensation constant should center them near 0 dB.
        let mut ch = model(4.0, 37.0);
        let mut total = 0.0;
        let n = 20_000;
        for i in 0..n {
            // Coherence time for stationary UEs is 10 s, so step time by 10.
            let loss = ch.update_fast_fading(0.0, (i as f64 + 1.0) * 10.0).unwrap();
            total += loss;
        }
        let mean = total / n as f64;
        assert!(mean.abs() < 0.1, "mean fading loss {mean} dB");
    }

    #[test]
    fn reproducible_across_identical_runs() {
        let run = || -> Vec<f64> {
            let registry = RngRegistry::new(99);
            let mut ch =
                ChannelModel::new("ue007", 3.5, 4.0, 37.0, registry.rng_for("ue007")).unwrap();
            let mut out = Vec::new();
            for i in 0..50 {
                let x = i as f64 * 15.0;
                out.push(ch.update_shadowing((x, 0.0, 1.5)).unwrap());
                out.push(ch.update_fast_fading(15.0, i as f64).unwrap());
            }
            out
        };
        assert_eq!(run(), run());
    }
}
