//! Convergence check battery for Monte Carlo tallies.
//!
//! A run takes moment snapshots of a tally every so often; each snapshot of a
//! total becomes a [`Checkpoint`]. The checks here look at that series and decide whether the estimate behaves
//! like a converged Monte Carlo result: small and shrinking relative error
//! that falls as `1/sqrt(N)`, small and shrinking variance of the variance,
//! a flat figure of merit, and a mean that does not drift. When the tally
//! keeps score histograms, the high-score tail of the history score
//! distribution must also fall off fast enough.
//!
//! Each check returns a [`CheckResult`] with a pass/fail determination, the
//! statistic it looked at, and a letter grade (A through F).

use mctally_core::{EntityId, ScoreHistogram, Tally, TallyError, TotalEstimate};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Processed total of one tally after `histories` histories.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub histories: u64,
    pub mean: f64,
    pub relative_error: f64,
    pub variance_of_variance: f64,
    pub figure_of_merit: f64,
}

impl Checkpoint {
    pub fn from_estimate(histories: u64, estimate: &TotalEstimate) -> Self {
        Self {
            histories,
            mean: estimate.mean,
            relative_error: estimate.relative_error,
            variance_of_variance: estimate.variance_of_variance,
            figure_of_merit: estimate.figure_of_merit,
        }
    }

    /// Series of one global total, one checkpoint per moment snapshot.
    pub fn series_from_snapshots(tally: &Tally, response_index: usize) -> Vec<Checkpoint> {
        tally
            .total_snapshot_estimates(response_index)
            .iter()
            .map(|(run, estimate)| Self::from_estimate(run.histories, estimate))
            .collect()
    }

    /// Series of one entity total, one checkpoint per moment snapshot.
    pub fn entity_series_from_snapshots(
        tally: &Tally,
        entity: EntityId,
        response_index: usize,
    ) -> Result<Vec<Checkpoint>, TallyError> {
        Ok(tally
            .entity_total_snapshot_estimates(entity, response_index)?
            .iter()
            .map(|(run, estimate)| Self::from_estimate(run.histories, estimate))
            .collect())
    }
}

/// Result of a single convergence check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub statistic: f64,
    pub details: String,
    pub grade: char,
}

impl CheckResult {
    /// Assign a letter grade based on p-value.
    ///
    /// - A: p >= 0.1
    /// - B: p >= 0.01
    /// - C: p >= 0.001
    /// - D: p >= 0.0001
    /// - F: otherwise or None
    pub fn grade_from_p(p: Option<f64>) -> char {
        match p {
            Some(p) if p >= 0.1 => 'A',
            Some(p) if p >= 0.01 => 'B',
            Some(p) if p >= 0.001 => 'C',
            Some(p) if p >= 0.0001 => 'D',
            _ => 'F',
        }
    }

    /// Grade a statistic against an upper limit by `value / limit`.
    ///
    /// - A: ratio <= 0.5
    /// - B: ratio <= 1
    /// - C: ratio <= 1.5
    /// - D: ratio <= 2
    /// - F: otherwise (including NaN)
    pub fn grade_from_ratio(ratio: f64) -> char {
        match ratio {
            r if r <= 0.5 => 'A',
            r if r <= 1.0 => 'B',
            r if r <= 1.5 => 'C',
            r if r <= 2.0 => 'D',
            _ => 'F',
        }
    }

    fn threshold(name: &str, value: f64, limit: f64, details: String) -> Self {
        let ratio = value / limit;
        Self {
            name: name.to_string(),
            passed: ratio <= 1.0,
            p_value: None,
            statistic: value,
            details,
            grade: Self::grade_from_ratio(ratio),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Return a failing `CheckResult` when the series is too short.
fn insufficient(name: &str, needed: usize, got: usize) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        passed: false,
        p_value: None,
        statistic: 0.0,
        details: format!("Insufficient data: need {needed} checkpoints, got {got}"),
        grade: 'F',
    }
}

/// Checkpoints from the middle of the series onward.
fn second_half(series: &[Checkpoint]) -> &[Checkpoint] {
    &series[series.len() / 2..]
}

/// Number of steps where `value` grows by more than `tolerance` (relative).
fn count_increases(values: impl Iterator<Item = f64>, tolerance: f64) -> usize {
    let values: Vec<f64> = values.collect();
    values
        .windows(2)
        .filter(|w| w[1] > w[0] * (1.0 + tolerance))
        .count()
}

/// Least-squares slope of `y` on `x`.
fn slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    Some(sxy / sxx)
}

fn standard_normal() -> Normal {
    Normal::standard()
}

/// Relative growth allowed between successive checkpoints before a
/// monotonicity check counts a step as an increase.
const MONOTONE_TOLERANCE: f64 = 0.05;

// ═══════════════════════════════════════════════════════════════════════════════
// 1. RELATIVE ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Check 1: final relative error below 0.10.
pub fn relative_error_magnitude(series: &[Checkpoint]) -> CheckResult {
    let name = "Relative Error Magnitude";
    let Some(last) = series.last() else {
        return insufficient(name, 1, 0);
    };
    if last.mean == 0.0 {
        return CheckResult {
            name: name.to_string(),
            passed: false,
            p_value: None,
            statistic: 0.0,
            details: "Tally never scored".to_string(),
            grade: 'F',
        };
    }
    CheckResult::threshold(
        name,
        last.relative_error,
        0.10,
        format!("R={:.4} after {} histories", last.relative_error, last.histories),
    )
}

/// Check 2: relative error does not grow over the second half of the run.
pub fn relative_error_decreasing(series: &[Checkpoint]) -> CheckResult {
    let name = "Relative Error Decreasing";
    if series.len() < 4 {
        return insufficient(name, 4, series.len());
    }
    let half = second_half(series);
    let increases = count_increases(half.iter().map(|c| c.relative_error), MONOTONE_TOLERANCE);
    CheckResult {
        name: name.to_string(),
        passed: increases == 0,
        p_value: None,
        statistic: increases as f64,
        details: format!("{increases} increase(s) over the last {} checkpoints", half.len()),
        grade: match increases {
            0 => 'A',
            1 => 'C',
            2 => 'D',
            _ => 'F',
        },
    }
}

/// Check 3: relative error falls as `1/sqrt(N)`.
///
/// The log-log slope of R against N over the second half must lie in
/// [-0.7, -0.3].
pub fn relative_error_scaling(series: &[Checkpoint]) -> CheckResult {
    let name = "Relative Error Scaling";
    let points: Vec<(f64, f64)> = second_half(series)
        .iter()
        .filter(|c| c.relative_error > 0.0 && c.histories > 0)
        .map(|c| ((c.histories as f64).ln(), c.relative_error.ln()))
        .collect();
    if points.len() < 3 {
        return insufficient(name, 3, points.len());
    }
    let Some(s) = slope(&points) else {
        return insufficient(name, 3, 1);
    };
    let deviation = (s + 0.5).abs();
    CheckResult {
        name: name.to_string(),
        passed: (-0.7..=-0.3).contains(&s),
        p_value: None,
        statistic: s,
        details: format!("slope={s:.3}, expected -0.5"),
        grade: CheckResult::grade_from_ratio(deviation / 0.2),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 2. VARIANCE OF THE VARIANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Check 4: final variance of the variance below 0.10.
pub fn vov_magnitude(series: &[Checkpoint]) -> CheckResult {
    let name = "VOV Magnitude";
    let Some(last) = series.last() else {
        return insufficient(name, 1, 0);
    };
    CheckResult::threshold(
        name,
        last.variance_of_variance,
        0.10,
        format!("VOV={:.4}", last.variance_of_variance),
    )
}

/// Check 5: variance of the variance does not grow over the second half.
pub fn vov_decreasing(series: &[Checkpoint]) -> CheckResult {
    let name = "VOV Decreasing";
    if series.len() < 4 {
        return insufficient(name, 4, series.len());
    }
    let half = second_half(series);
    let increases = count_increases(
        half.iter().map(|c| c.variance_of_variance),
        MONOTONE_TOLERANCE,
    );
    CheckResult {
        name: name.to_string(),
        passed: increases == 0,
        p_value: None,
        statistic: increases as f64,
        details: format!("{increases} increase(s) over the last {} checkpoints", half.len()),
        grade: match increases {
            0 => 'A',
            1 => 'C',
            2 => 'D',
            _ => 'F',
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 3. EFFICIENCY AND DRIFT
// ═══════════════════════════════════════════════════════════════════════════════

/// Check 6: figure of merit is flat over the second half (coefficient of
/// variation below 0.10).
pub fn fom_stability(series: &[Checkpoint]) -> CheckResult {
    let name = "FOM Stability";
    if series.len() < 4 {
        return insufficient(name, 4, series.len());
    }
    let foms: Vec<f64> = second_half(series).iter().map(|c| c.figure_of_merit).collect();
    let n = foms.len() as f64;
    let mean = foms.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return CheckResult {
            name: name.to_string(),
            passed: false,
            p_value: None,
            statistic: 0.0,
            details: "FOM is zero".to_string(),
            grade: 'F',
        };
    }
    let var = foms.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let cv = var.sqrt() / mean;
    CheckResult::threshold(name, cv, 0.10, format!("mean FOM={mean:.3e}, CV={cv:.4}"))
}

/// Check 7: the mean of the second half of the histories agrees with the
/// mean at mid-run.
///
/// The two halves are independent, so their difference over its standard
/// error is approximately standard normal; the two-sided p-value must be at
/// least 0.01.
pub fn mean_stability(series: &[Checkpoint]) -> CheckResult {
    let name = "Mean Stability";
    if series.len() < 2 {
        return insufficient(name, 2, series.len());
    }
    let mid = series[(series.len() - 1) / 2];
    let Some(last) = series.last().copied() else {
        return insufficient(name, 2, 0);
    };
    if last.histories <= mid.histories || mid.histories == 0 {
        return insufficient(name, 2, 1);
    }

    let n1 = mid.histories as f64;
    let n2 = last.histories as f64;
    let later_mean = (n2 * last.mean - n1 * mid.mean) / (n2 - n1);
    let sigma_mid = mid.relative_error * mid.mean.abs();
    let sigma_later = last.relative_error * last.mean.abs() * (n2 / (n2 - n1)).sqrt();
    let sigma = (sigma_mid * sigma_mid + sigma_later * sigma_later).sqrt();
    if sigma == 0.0 {
        let same = later_mean == mid.mean;
        return CheckResult {
            name: name.to_string(),
            passed: same,
            p_value: None,
            statistic: 0.0,
            details: "zero variance".to_string(),
            grade: if same { 'A' } else { 'F' },
        };
    }

    let z = (later_mean - mid.mean) / sigma;
    let p = 2.0 * (1.0 - standard_normal().cdf(z.abs()));
    CheckResult {
        name: name.to_string(),
        passed: p >= 0.01,
        p_value: Some(p),
        statistic: z,
        details: format!("mid={:.5e}, later={later_mean:.5e}, z={z:.3}", mid.mean),
        grade: CheckResult::grade_from_p(Some(p)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 4. SCORE DISTRIBUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Steepest tail slope treated as a perfect score.
const MAX_TAIL_SLOPE: f64 = 10.0;

/// Check 8: the density of large history scores falls at least as fast as
/// `1/x^3`, so the second moment exists.
///
/// Fits `ln(density)` against `ln(score)` over the upper half of the
/// occupied positive-score bins; the negated slope must be at least 3.
pub fn pdf_tail_slope(histogram: &ScoreHistogram) -> CheckResult {
    let name = "PDF Tail Slope";
    let bounds = histogram.boundaries();
    let occupied: Vec<(f64, f64)> = histogram
        .counts()
        .iter()
        .enumerate()
        .filter(|&(i, &count)| count > 0 && bounds[i] > 0.0)
        .map(|(i, &count)| {
            let width = bounds[i + 1] - bounds[i];
            let mid = 0.5 * (bounds[i] + bounds[i + 1]);
            (mid.ln(), (count as f64 / width).ln())
        })
        .collect();
    let tail = second_half_points(&occupied);
    if tail.len() < 3 {
        return insufficient(name, 3, tail.len());
    }
    let Some(s) = slope(tail) else {
        return insufficient(name, 3, 1);
    };
    let steepness = (-s).min(MAX_TAIL_SLOPE);
    CheckResult {
        name: name.to_string(),
        passed: steepness >= 3.0,
        p_value: None,
        statistic: steepness,
        details: format!("slope={s:.3} over {} bins, need <= -3", tail.len()),
        grade: if steepness > 0.0 {
            CheckResult::grade_from_ratio(3.0 / steepness)
        } else {
            'F'
        },
    }
}

fn second_half_points(points: &[(f64, f64)]) -> &[(f64, f64)] {
    &points[points.len() / 2..]
}

/// Two-sided normal confidence interval around `mean` at `level` (e.g. 0.95).
/// Returns `None` unless `0 < level < 1`.
pub fn confidence_interval(mean: f64, relative_error: f64, level: f64) -> Option<(f64, f64)> {
    if !(level > 0.0 && level < 1.0) {
        return None;
    }
    let z = standard_normal().inverse_cdf(0.5 + level / 2.0);
    let half_width = z * relative_error * mean.abs();
    Some((mean - half_width, mean + half_width))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Check battery
// ═══════════════════════════════════════════════════════════════════════════════

/// Run every convergence check on a checkpoint series.
pub fn run_all_checks(series: &[Checkpoint]) -> Vec<CheckResult> {
    let checks: Vec<fn(&[Checkpoint]) -> CheckResult> = vec![
        // Relative error (3)
        relative_error_magnitude,
        relative_error_decreasing,
        relative_error_scaling,
        // VOV (2)
        vov_magnitude,
        vov_decreasing,
        // Efficiency and drift (2)
        fom_stability,
        mean_stability,
    ];
    checks.iter().map(|check| check(series)).collect()
}

/// Run the checkpoint battery on one global total of `tally`, built from its
/// moment snapshots, plus the tail check when the total keeps a histogram.
pub fn run_tally_checks(tally: &Tally, response_index: usize) -> Vec<CheckResult> {
    let mut results = run_all_checks(&Checkpoint::series_from_snapshots(tally, response_index));
    if let Some(histogram) = tally.total_histograms().get(response_index) {
        results.push(pdf_tail_slope(histogram));
    }
    results
}

/// Calculate overall quality score (0-100) from check results.
///
/// Each grade maps to a score: A=100, B=75, C=50, D=25, F=0.
/// Returns the average across all checks.
pub fn calculate_quality_score(results: &[CheckResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let total: f64 = results
        .iter()
        .map(|r| match r.grade {
            'A' => 100.0,
            'B' => 75.0,
            'C' => 50.0,
            'D' => 25.0,
            _ => 0.0,
        })
        .sum();
    total / results.len() as f64
}

/// Pretty-print check results.
pub fn print_checks(results: &[CheckResult]) {
    println!("\n{:<28} {:>5} {:>12} {:>10}  Details", "Check", "Grade", "Statistic", "p");
    println!("{}", "-".repeat(80));
    for r in results {
        let p = r.p_value.map_or("-".to_string(), |p| format!("{p:.4}"));
        println!(
            "{:<28} {:>5} {:>12.4} {:>10}  {}",
            r.name, r.grade, r.statistic, p, r.details
        );
    }
    let passed = results.iter().filter(|r| r.passed).count();
    println!(
        "\n{passed}/{} checks passed, quality score {:.1}",
        results.len(),
        calculate_quality_score(results)
    );
}
