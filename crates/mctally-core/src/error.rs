//! Error type for tally configuration and collective operations.
//!
//! Only setup-time and teardown-time operations return [`TallyError`]. The
//! per-history hot path (partial contributions, event handlers, commit) never
//! fails: precondition violations there are caught by `debug_assert!` in
//! debug builds and silently ignored in release builds.

use thiserror::Error;

use crate::phase_space::PhaseSpaceDimension;
use crate::registry::EntityId;

/// Identifier of a tally instance, carried by every error for context.
pub type TallyId = u32;

/// Failure of a tally setup, query, or collective operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TallyError {
    /// Boundaries are not strictly ascending, too few, or out of the
    /// dimension's domain.
    #[error("tally {tally}: invalid {dimension} bin boundaries: {reason}")]
    InvalidBinBoundaries {
        tally: TallyId,
        dimension: PhaseSpaceDimension,
        reason: String,
    },

    /// The dimension cannot be discretized by this kind of tally.
    #[error("tally {tally}: {dimension} binning is not supported by {kind} tallies")]
    UnsupportedDimension {
        tally: TallyId,
        dimension: PhaseSpaceDimension,
        kind: &'static str,
    },

    /// Normalization constants must be finite and strictly positive.
    #[error("tally {tally}: entity {entity} has invalid normalization constant {value}")]
    InvalidNormalizationConstant {
        tally: TallyId,
        entity: EntityId,
        value: f64,
    },

    #[error("tally {tally}: at least one entity must be assigned")]
    NoEntities { tally: TallyId },

    #[error("tally {tally}: entity {entity} is not assigned")]
    UnassignedEntity { tally: TallyId, entity: EntityId },

    #[error("tally {tally}: at least one response function is required")]
    NoResponseFunctions { tally: TallyId },

    #[error("tally {tally}: at least one particle type is required")]
    NoParticleTypes { tally: TallyId },

    /// A structural change or collective was requested while histories are
    /// still in flight.
    #[error("tally {tally}: {threads} thread(s) hold uncommitted history contributions")]
    UncommittedContributions { tally: TallyId, threads: usize },

    #[error("tally {tally}: invalid score histogram boundaries: {reason}")]
    InvalidHistogramBoundaries { tally: TallyId, reason: String },

    #[error("invalid tally option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("tally {tally}: reduction failed: {reason}")]
    Reduction { tally: TallyId, reason: String },
}
