//! Derived statistics from raw moment records.
//!
//! With `N` histories and running sums `M1..M4` of the per-history score `x`:
//!
//! - mean            `x̄ = M1 / N`
//! - relative error  `R = sqrt((M2/N - x̄²) / (N - 1)) / |x̄|`
//! - VOV             `(M4 - 4 M1 M3/N + 8 M2 M1²/N² - 4 M1⁴/N³ - M2²/N) / (M2 - M1²/N)²`
//! - figure of merit `1 / (R² t)`
//!
//! Every statistic degenerates to zero instead of failing when it is not
//! defined (too few histories, zero mean, zero variance, zero time).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::moments::MomentRecord;

/// Run-level context needed to turn raw moments into estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Histories simulated across every thread and rank.
    pub histories: u64,
    /// Wall-clock time spent simulating them.
    pub elapsed: Duration,
}

impl RunStatistics {
    pub fn new(histories: u64, elapsed: Duration) -> Self {
        Self { histories, elapsed }
    }
}

/// Processed estimate of one bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinEstimate {
    pub mean: f64,
    pub relative_error: f64,
    pub figure_of_merit: f64,
}

/// Processed estimate of an entity or global total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalEstimate {
    pub mean: f64,
    pub relative_error: f64,
    pub variance_of_variance: f64,
    pub figure_of_merit: f64,
}

/// `multiplier * M1 / (N * normalization)`.
pub fn mean(record: &MomentRecord, histories: u64, normalization: f64, multiplier: f64) -> f64 {
    if histories == 0 || normalization == 0.0 {
        return 0.0;
    }
    multiplier * record.m1 / (histories as f64 * normalization)
}

pub fn relative_error(m1: f64, m2: f64, histories: u64) -> f64 {
    if histories <= 1 || m1 == 0.0 {
        return 0.0;
    }
    let n = histories as f64;
    let mean = m1 / n;
    let variance = (m2 / n - mean * mean) / (n - 1.0);
    if variance <= 0.0 {
        return 0.0;
    }
    variance.sqrt() / mean.abs()
}

pub fn variance_of_variance(record: &MomentRecord, histories: u64) -> f64 {
    if histories <= 1 {
        return 0.0;
    }
    let n = histories as f64;
    let MomentRecord { m1, m2, m3, m4 } = *record;
    let m1_sq = m1 * m1;

    let denominator = (m2 - m1_sq / n).powi(2);
    if denominator <= 0.0 || !denominator.is_normal() {
        return 0.0;
    }
    let numerator =
        m4 - 4.0 * m1 * m3 / n + 8.0 * m2 * m1_sq / (n * n) - 4.0 * m1_sq * m1_sq / (n * n * n)
            - m2 * m2 / n;
    numerator / denominator
}

pub fn figure_of_merit(relative_error: f64, elapsed: Duration) -> f64 {
    let t = elapsed.as_secs_f64();
    if relative_error <= 0.0 || t <= 0.0 {
        return 0.0;
    }
    1.0 / (relative_error * relative_error * t)
}

pub fn process_bin(
    record: &MomentRecord,
    run: &RunStatistics,
    normalization: f64,
    multiplier: f64,
) -> BinEstimate {
    let relative_error = relative_error(record.m1, record.m2, run.histories);
    BinEstimate {
        mean: mean(record, run.histories, normalization, multiplier),
        relative_error,
        figure_of_merit: figure_of_merit(relative_error, run.elapsed),
    }
}

pub fn process_total(
    record: &MomentRecord,
    run: &RunStatistics,
    normalization: f64,
    multiplier: f64,
) -> TotalEstimate {
    let relative_error = relative_error(record.m1, record.m2, run.histories);
    TotalEstimate {
        mean: mean(record, run.histories, normalization, multiplier),
        relative_error,
        variance_of_variance: variance_of_variance(record, run.histories),
        figure_of_merit: figure_of_merit(relative_error, run.elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(samples: &[f64]) -> MomentRecord {
        let mut r = MomentRecord::default();
        samples.iter().for_each(|&v| r.add_sample(v));
        r
    }

    #[test]
    fn mean_includes_normalization_and_multiplier() {
        let r = record(&[4.0, 4.0, 4.0]);
        assert_eq!(mean(&r, 3, 2.0, 1.0), 2.0);
        assert_eq!(mean(&r, 3, 2.0, 10.0), 20.0);
        assert_eq!(mean(&r, 0, 2.0, 1.0), 0.0);
    }

    #[test]
    fn relative_error_reference_value() {
        assert!((relative_error(10.0, 100.0, 100) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn relative_error_vanishes_for_identical_scores() {
        let r = record(&[3.0; 50]);
        assert_eq!(relative_error(r.m1, r.m2, 50), 0.0);
    }

    #[test]
    fn degenerate_statistics_are_zero() {
        assert_eq!(relative_error(5.0, 25.0, 1), 0.0);
        assert_eq!(relative_error(0.0, 4.0, 10), 0.0);
        assert_eq!(variance_of_variance(&record(&[2.0, 2.0]), 2), 0.0);
        assert_eq!(figure_of_merit(0.0, Duration::from_secs(1)), 0.0);
        assert_eq!(figure_of_merit(0.1, Duration::ZERO), 0.0);
    }

    #[test]
    fn vov_reference_value() {
        let r = MomentRecord {
            m1: 10.0,
            m2: 100.0,
            m3: 1000.0,
            m4: 10000.0,
        };
        assert!((variance_of_variance(&r, 100) - 0.970_101_010_101_01).abs() < 1e-12);
    }

    #[test]
    fn fom_reference_value() {
        let fom = figure_of_merit(2.0, Duration::from_secs(1000));
        assert!((fom - 2.5e-4).abs() < 1e-15);
    }

    #[test]
    fn process_total_combines() {
        let run = RunStatistics::new(4, Duration::from_secs(2));
        let est = process_total(&record(&[1.0, 0.0, 3.0, 0.0]), &run, 1.0, 1.0);
        assert_eq!(est.mean, 1.0);
        // sample variance of the mean: (10/4 - 1) / 3 = 0.5
        assert!((est.relative_error - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((est.figure_of_merit - 1.0).abs() < 1e-12);
        assert!(est.variance_of_variance > 0.0);
    }
}
