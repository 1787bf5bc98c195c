//! Per-record histograms of committed history scores.
//!
//! A histogram with boundaries `b0 < b1 < ... < bN` has `N` bins. Every bin is
//! `[b_i, b_i+1)` except the last, which is closed on both ends. Scores
//! outside `[b0, bN]` are dropped and not counted. The default histogram has
//! one bin spanning every finite score.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistogram {
    boundaries: Vec<f64>,
    counts: Vec<u64>,
}

impl Default for ScoreHistogram {
    fn default() -> Self {
        Self::with_boundaries(vec![f64::MIN, f64::MAX])
    }
}

impl ScoreHistogram {
    /// Histogram over already validated boundaries (at least two, strictly
    /// ascending, finite).
    pub fn with_boundaries(boundaries: Vec<f64>) -> Self {
        debug_assert!(boundaries.len() >= 2);
        let bins = boundaries.len().saturating_sub(1);
        Self {
            boundaries,
            counts: vec![0; bins],
        }
    }

    /// Check a boundary list, returning the reason it is unusable.
    pub fn validate_boundaries(boundaries: &[f64]) -> Result<(), String> {
        if boundaries.len() < 2 {
            return Err(format!("at least 2 boundaries required, got {}", boundaries.len()));
        }
        if let Some(b) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(format!("non-finite boundary {b}"));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err("not strictly ascending".to_string());
        }
        Ok(())
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Scores that landed in a bin.
    pub fn number_of_scores(&self) -> u64 {
        self.counts.iter().sum()
    }

    fn bin_index(&self, score: f64) -> Option<usize> {
        let (&first, &last) = (self.boundaries.first()?, self.boundaries.last()?);
        if !(first..=last).contains(&score) {
            return None;
        }
        // first boundary strictly greater than the score closes its bin
        let upper = self.boundaries.partition_point(|&b| b <= score);
        Some(upper.saturating_sub(1).min(self.counts.len() - 1))
    }

    pub fn add_score(&mut self, score: f64) {
        if let Some(bin) = self.bin_index(score) {
            self.counts[bin] += 1;
        }
    }

    /// Bin-wise sum with a histogram over the same boundaries.
    pub fn merge(&mut self, other: &ScoreHistogram) {
        debug_assert_eq!(self.boundaries, other.boundaries);
        for (count, extra) in self.counts.iter_mut().zip(&other.counts) {
            *count += extra;
        }
    }

    /// Zero the counts, keeping the boundaries.
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub(crate) fn extend_flat(&self, out: &mut Vec<f64>) {
        out.extend(self.counts.iter().map(|&c| c as f64));
    }

    /// Overwrite the counts from a flattened run; `values` must hold
    /// [`ScoreHistogram::len`] entries.
    pub(crate) fn load_flat(&mut self, values: &[f64]) {
        for (count, &value) in self.counts.iter_mut().zip(values) {
            *count = value.max(0.0).round() as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bins() -> ScoreHistogram {
        ScoreHistogram::with_boundaries(vec![0.0, 1.0, 2.0])
    }

    #[test]
    fn default_counts_everything() {
        let mut h = ScoreHistogram::default();
        assert_eq!(h.len(), 1);
        for score in [-1.0, 0.0, 1.0, 2.0, 3.0] {
            h.add_score(score);
        }
        assert_eq!(h.counts(), &[5]);
        assert_eq!(h.number_of_scores(), 5);
    }

    #[test]
    fn bins_are_half_open_except_the_last() {
        let mut h = two_bins();
        for score in [-1.0, 0.0, 1.0, 2.0, 3.0] {
            h.add_score(score);
        }
        assert_eq!(h.counts(), &[1, 2]);
        assert_eq!(h.number_of_scores(), 3);

        h.add_score(0.999);
        assert_eq!(h.counts(), &[2, 2]);
    }

    #[test]
    fn reset_keeps_boundaries() {
        let mut h = two_bins();
        h.add_score(0.5);
        h.add_score(1.5);
        h.reset();
        assert_eq!(h.number_of_scores(), 0);
        assert_eq!(h.boundaries(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn merge_and_flat_round_trip() {
        let mut a = two_bins();
        a.add_score(0.5);
        let mut b = two_bins();
        b.add_score(1.5);
        b.add_score(1.7);
        a.merge(&b);
        assert_eq!(a.counts(), &[1, 2]);

        let mut flat = Vec::new();
        a.extend_flat(&mut flat);
        let mut fresh = two_bins();
        fresh.load_flat(&flat);
        assert_eq!(fresh, a);
    }

    #[test]
    fn boundary_validation() {
        assert!(ScoreHistogram::validate_boundaries(&[0.0]).is_err());
        assert!(ScoreHistogram::validate_boundaries(&[1.0, 0.0]).is_err());
        assert!(ScoreHistogram::validate_boundaries(&[0.0, f64::INFINITY]).is_err());
        assert!(ScoreHistogram::validate_boundaries(&[-5.0, 0.0, 5.0]).is_ok());
    }
}
