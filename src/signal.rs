//! Radio signal calculations.
//!
//! Contains helpers for:
//! - 3GPP TR 38.901 style path loss models (Alpha-Beta-Gamma and Close-In)
//! - dBm/mW power conversions
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Distance: meters
//! - Frequency: GHz in the path loss formulas

use serde::Deserialize;

/// Path loss model selector with its parameters.
///
/// Both models clamp the distance to at least 1 meter, so the loss at the
/// antenna position equals the loss at the 1 m reference distance.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PathLossModel {
    /// Alpha-Beta-Gamma model:
    /// `PL = 10·α·log10(d) + β + 10·γ·log10(f_GHz)`
    Abg {
        /// Distance-dependent path loss exponent.
        alpha: f64,
        /// Floating intercept in dB.
        beta: f64,
        /// Frequency-dependent path loss exponent.
        gamma: f64,
    },
    /// Close-In model:
    /// `PL = 32.4 + 10·n·log10(d) + 20·log10(f_GHz)`
    CloseIn {
        /// Path loss exponent.
        n: f64,
    },
}

impl Default for PathLossModel {
    /// Urban macro ABG parameters.
    fn default() -> Self {
        PathLossModel::Abg {
            alpha: 3.5,
            beta: 22.4,
            gamma: 2.0,
        }
    }
}

impl PathLossModel {
    /// Deterministic path loss in dB at `distance_m` meters for a carrier at
    /// `frequency_ghz`. Shadowing and fading are modeled separately per UE;
    /// this value is always positive.
    pub fn path_loss_db(&self, distance_m: f64, frequency_ghz: f64) -> f64 {
        let d = distance_m.max(1.0);
        match *self {
            PathLossModel::Abg { alpha, beta, gamma } => {
                10.0 * alpha * d.log10() + beta + 10.0 * gamma * frequency_ghz.log10()
            }
            PathLossModel::CloseIn { n } => {
                32.4 + 10.0 * n * d.log10() + 20.0 * frequency_ghz.log10()
            }
        }
    }
}

/// Convert power from dBm to milliwatts: `P(mW) = 10^(P(dBm)/10)`.
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm: `P(dBm) = 10·log10(P(mW))`.
///
/// For `mw <= 0` the result is -inf or NaN; callers guard for that.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abg_matches_hand_computed_value() {
        let model = PathLossModel::Abg {
            alpha: 3.5,
            beta: 22.4,
            gamma: 2.0,
        };
        // 10*3.5*log10(100) + 22.4 + 10*2*log10(3.5) = 70 + 22.4 + 10.881
        let pl = model.path_loss_db(100.0, 3.5);
        assert!((pl - 103.281).abs() < 0.01, "got {pl}");
    }

    #[test]
    fn close_in_matches_hand_computed_value() {
        let model = PathLossModel::CloseIn { n: 2.0 };
        // 32.4 + 20*log10(1000) + 20*log10(3.5) = 32.4 + 60 + 10.881
        let pl = model.path_loss_db(1000.0, 3.5);
        assert!((pl - 103.281).abs() < 0.01, "got {pl}");
    }

    #[test]
    fn distance_is_clamped_to_one_meter() {
        let model = PathLossModel::default();
        assert_eq!(model.path_loss_db(0.0, 3.5), model.path_loss_db(1.0, 3.5));
        assert_eq!(model.path_loss_db(0.5, 3.5), model.path_loss_db(1.0, 3.5));
    }

    #[test]
    fn path_loss_increases_with_distance() {
        let model = PathLossModel::default();
        let near = model.path_loss_db(100.0, 3.5);
        let far = model.path_loss_db(900.0, 3.5);
        assert!(far > near);
    }

    #[test]
    fn dbm_mw_conversion_roundtrip() {
        for v in [-100.0, -50.0, 0.0, 10.0, 43.0] {
            let mw = dbm_to_mw(v);
            let back = mw_to_dbm(mw);
            assert!((v - back).abs() < 1e-9);
        }
    }
}
