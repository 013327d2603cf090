//! Seeded paired-experiment harness.
//!
//! Runs the same scenario under the A3 rule and under the predictor for
//! each seed, pairs the per-seed summaries, and computes paired statistics
//! (mean difference, t-statistic, two-sided p, Cohen's d_z) per metric.
//! Identical seeds give both arms identical random channel conditions, so
//! the differences isolate the decision strategy.

use crate::engine::EngineMode;
use crate::simulation::scenario::Scenario;
use crate::simulation::{RunSummary, Runtime, run_to_completion};
use embassy_executor::Spawner;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Paired comparison of one metric across seeds.
#[derive(Debug, Clone, Serialize)]
pub struct PairedComparison {
    pub metric: String,
    pub n: usize,
    pub a3_mean: f64,
    pub ml_mean: f64,
    /// ml - a3 per seed, averaged.
    pub mean_diff: f64,
    pub std_diff: f64,
    pub t_statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub cohens_d_z: Option<f64>,
}

/// Full experiment output, serialized to JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub scenario: String,
    pub created_at: String,
    pub seeds: Vec<u64>,
    pub runs: Vec<RunSummary>,
    pub comparisons: Vec<PairedComparison>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Paired t-test over per-seed (a3, ml) samples.
pub fn paired_comparison(metric: &str, a3: &[f64], ml: &[f64]) -> PairedComparison {
    debug_assert_eq!(a3.len(), ml.len());
    let n = a3.len().min(ml.len());
    let diffs: Vec<f64> = (0..n).map(|i| ml[i] - a3[i]).collect();
    let mean_diff = mean(&diffs);
    let std_diff = if n > 1 {
        let var = diffs
            .iter()
            .map(|d| (d - mean_diff) * (d - mean_diff))
            .sum::<f64>()
            / (n as f64 - 1.0);
        var.sqrt()
    } else {
        0.0
    };

    let (t_statistic, p_value, cohens_d_z) = if n > 1 && std_diff > 0.0 {
        let t = mean_diff / (std_diff / (n as f64).sqrt());
        let p = StudentsT::new(0.0, 1.0, n as f64 - 1.0)
            .ok()
            .map(|dist| 2.0 * (1.0 - dist.cdf(t.abs())));
        (Some(t), p, Some(mean_diff / std_diff))
    } else {
        (None, None, None)
    };

    PairedComparison {
        metric: metric.to_string(),
        n,
        a3_mean: mean(&a3[..n]),
        ml_mean: mean(&ml[..n]),
        mean_diff,
        std_diff,
        t_statistic,
        p_value,
        cohens_d_z,
    }
}

fn compare_all(a3_runs: &[RunSummary], ml_runs: &[RunSummary]) -> Vec<PairedComparison> {
    let extract = |runs: &[RunSummary], f: fn(&RunSummary) -> f64| -> Vec<f64> {
        runs.iter().map(f).collect()
    };
    let metrics: [(&str, fn(&RunSummary) -> f64); 5] = [
        ("handovers_applied", |r| r.handovers_applied as f64),
        ("handovers_suppressed", |r| r.handovers_suppressed as f64),
        ("rlf_total", |r| r.rlf_total as f64),
        ("mean_throughput_mbps", |r| r.mean_throughput_mbps),
        ("total_interruption_s", |r| r.total_interruption_s),
    ];
    metrics
        .iter()
        .map(|(name, f)| paired_comparison(name, &extract(a3_runs, *f), &extract(ml_runs, *f)))
        .collect()
}

/// Run the paired experiment: every seed once per arm, A3 first.
///
/// Each run gets a fresh `Runtime` (leaked for `'static` worker access,
/// one per run for the process lifetime) so no state crosses runs; only
/// the seed ties the two arms together.
pub async fn run_experiment(
    spawner: Spawner,
    scenario: &Scenario,
    seeds: &[u64],
) -> anyhow::Result<ExperimentReport> {
    let scenario_name = scenario.name.clone().unwrap_or_else(|| "unnamed".into());
    let mut runs = Vec::with_capacity(seeds.len() * 2);
    let mut a3_runs = Vec::with_capacity(seeds.len());
    let mut ml_runs = Vec::with_capacity(seeds.len());

    for &seed in seeds {
        for (mode, arm) in [(EngineMode::A3, "a3"), (EngineMode::Ml, "ml")] {
            let label = format!("{}-{}-seed{}", scenario_name, arm, seed);
            let runtime: &'static Runtime =
                Box::leak(Box::new(Runtime::build(scenario, seed, mode, &label)?));
            if !runtime.rng.verify(32) {
                anyhow::bail!("RNG reproducibility self-test failed for {}", label);
            }
            let summary = run_to_completion(spawner, runtime).await;
            if summary.failed {
                anyhow::bail!("run {} failed; aborting experiment", label);
            }
            match mode {
                EngineMode::A3 => a3_runs.push(summary.clone()),
                _ => ml_runs.push(summary.clone()),
            }
            runs.push(summary);
        }
        log::info!("Seed {} complete ({} runs so far)", seed, runs.len());
    }

    Ok(ExperimentReport {
        scenario: scenario_name,
        created_at: chrono::Utc::now().to_rfc3339(),
        seeds: seeds.to_vec(),
        runs,
        comparisons: compare_all(&a3_runs, &ml_runs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paired_comparison_detects_a_consistent_shift() {
        let a3 = [10.0, 12.0, 11.0, 13.0, 12.0];
        let ml = [7.0, 9.0, 8.0, 10.0, 9.0];
        let cmp = paired_comparison("handovers_applied", &a3, &ml);
        assert_eq!(cmp.n, 5);
        assert!((cmp.mean_diff - (-3.0)).abs() < 1e-12);
        // Constant shift: zero variance in the differences, degenerate t.
        assert_eq!(cmp.std_diff, 0.0);
        assert!(cmp.t_statistic.is_none());
    }

    #[test]
    fn paired_comparison_produces_significance_for_clear_effects() {
        let a3 = [10.0, 12.0, 11.0, 13.0, 12.0, 14.0];
        let ml = [6.9, 9.2, 8.1, 9.8, 8.9, 10.7];
        let cmp = paired_comparison("handovers_applied", &a3, &ml);
        let t = cmp.t_statistic.unwrap();
        assert!(t < -5.0, "t {t}");
        let p = cmp.p_value.unwrap();
        assert!(p < 0.01, "p {p}");
        assert!(cmp.cohens_d_z.unwrap() < -1.0);
    }

    #[test]
    fn single_sample_has_no_test_statistics() {
        let cmp = paired_comparison("rlf_total", &[3.0], &[1.0]);
        assert_eq!(cmp.n, 1);
        assert!((cmp.mean_diff - (-2.0)).abs() < 1e-12);
        assert!(cmp.t_statistic.is_none());
        assert!(cmp.p_value.is_none());
    }
}
