//! Tally construction options.

use serde::{Deserialize, Serialize};

use crate::error::TallyError;
use crate::particle::ContributionMultiplier;

/// Options fixed at tally construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyOptions {
    /// Constant applied to every mean (source strength, unit conversion).
    pub multiplier: f64,
    /// How particle state scales each raw contribution.
    pub contribution: ContributionMultiplier,
    /// Surface-flux grazing-angle cutoff on |cosine|.
    pub cosine_cutoff: f64,
}

impl Default for TallyOptions {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            contribution: ContributionMultiplier::Weight,
            cosine_cutoff: 0.001,
        }
    }
}

impl TallyOptions {
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_contribution(mut self, contribution: ContributionMultiplier) -> Self {
        self.contribution = contribution;
        self
    }

    pub fn with_cosine_cutoff(mut self, cutoff: f64) -> Self {
        self.cosine_cutoff = cutoff;
        self
    }

    pub fn validate(&self) -> Result<(), TallyError> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(TallyError::InvalidOption {
                option: "multiplier",
                reason: format!("must be positive and finite, got {}", self.multiplier),
            });
        }
        if !(self.cosine_cutoff > 0.0 && self.cosine_cutoff <= 1.0) {
            return Err(TallyError::InvalidOption {
                option: "cosine_cutoff",
                reason: format!("must lie in (0, 1], got {}", self.cosine_cutoff),
            });
        }
        Ok(())
    }
}
