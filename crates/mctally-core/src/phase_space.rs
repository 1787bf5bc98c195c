//! Phase-space discretization.
//!
//! A [`PhaseSpaceBinSet`] holds up to one discretization per
//! [`PhaseSpaceDimension`]. Each maps a particle attribute to a bin index; the
//! set composes the per-dimension indices (and the response-function index)
//! into one flat bin index.
//!
//! Bin conventions:
//! - Continuous dimensions (energy, time, cosine, source energy and time) with boundaries
//!   `b0 < b1 < ... < bN` have `N` bins. The first bin is `[b0, b1]`, every
//!   later bin is `(b_i, b_i+1]`.
//! - Counting dimensions (collision number, source id) with boundaries
//!   `b0 < ... < bN` have `N + 1` bins: `[0, b0]`, then `(b_i-1, b_i]`.
//!
//! The first-assigned dimension varies fastest in the flat index.

use serde::{Deserialize, Serialize};

use crate::error::{TallyError, TallyId};
use crate::particle::ParticleState;

/// A binnable particle attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSpaceDimension {
    Energy,
    Time,
    CollisionNumber,
    Cosine,
    /// Energy the history's source particle was born with.
    SourceEnergy,
    /// Birth time of the history's source particle.
    SourceTime,
    /// Id of the source that emitted the history.
    SourceId,
}

impl PhaseSpaceDimension {
    pub const ALL: [PhaseSpaceDimension; 7] = [
        Self::Energy,
        Self::Time,
        Self::CollisionNumber,
        Self::Cosine,
        Self::SourceEnergy,
        Self::SourceTime,
        Self::SourceId,
    ];

    /// Counting dimensions bin integers starting at zero.
    pub fn is_counting(self) -> bool {
        matches!(self, Self::CollisionNumber | Self::SourceId)
    }

    fn unit(self) -> &'static str {
        match self {
            Self::Energy | Self::SourceEnergy => "MeV",
            Self::Time | Self::SourceTime => "s",
            Self::CollisionNumber | Self::Cosine | Self::SourceId => "",
        }
    }
}

impl std::fmt::Display for PhaseSpaceDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Energy => write!(f, "energy"),
            Self::Time => write!(f, "time"),
            Self::CollisionNumber => write!(f, "collision number"),
            Self::Cosine => write!(f, "cosine"),
            Self::SourceEnergy => write!(f, "source energy"),
            Self::SourceTime => write!(f, "source time"),
            Self::SourceId => write!(f, "source id"),
        }
    }
}

/// The particle attributes a phase-space bin set looks at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpacePoint {
    pub energy: f64,
    pub time: f64,
    pub collision_number: u32,
    /// Angle cosine relative to a surface normal; only surface events have one.
    pub cosine: Option<f64>,
    pub source_energy: f64,
    pub source_time: f64,
    pub source_id: u64,
}

impl PhaseSpacePoint {
    pub fn from_particle(particle: &ParticleState) -> Self {
        Self {
            energy: particle.energy,
            time: particle.time,
            collision_number: particle.collision_number,
            cosine: None,
            source_energy: particle.source_energy,
            source_time: particle.source_time,
            source_id: particle.source_id,
        }
    }

    /// Point of a whole-history energy deposition with no source attributes.
    pub fn deposition(energy: f64) -> Self {
        Self {
            energy,
            time: 0.0,
            collision_number: 0,
            cosine: None,
            source_energy: 0.0,
            source_time: 0.0,
            source_id: 0,
        }
    }

    /// Carry the source attributes of the history that made a deposition.
    pub fn with_source_of(mut self, particle: &ParticleState) -> Self {
        self.source_energy = particle.source_energy;
        self.source_time = particle.source_time;
        self.source_id = particle.source_id;
        self
    }

    pub fn with_cosine(mut self, cosine: f64) -> Self {
        self.cosine = Some(cosine);
        self
    }

    fn value(&self, dimension: PhaseSpaceDimension) -> Option<f64> {
        match dimension {
            PhaseSpaceDimension::Energy => Some(self.energy),
            PhaseSpaceDimension::Time => Some(self.time),
            PhaseSpaceDimension::CollisionNumber => Some(f64::from(self.collision_number)),
            PhaseSpaceDimension::Cosine => self.cosine,
            PhaseSpaceDimension::SourceEnergy => Some(self.source_energy),
            PhaseSpaceDimension::SourceTime => Some(self.source_time),
            // ids beyond 2^53 lose precision; source ids are small in practice
            PhaseSpaceDimension::SourceId => Some(self.source_id as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Discretization {
    dimension: PhaseSpaceDimension,
    boundaries: Vec<f64>,
}

impl Discretization {
    fn number_of_bins(&self) -> usize {
        if self.dimension.is_counting() {
            self.boundaries.len()
        } else {
            self.boundaries.len() - 1
        }
    }

    fn bin_index(&self, value: f64) -> Option<usize> {
        let last = *self.boundaries.last()?;
        if value.is_nan() || value > last {
            return None;
        }
        // Number of boundaries strictly below the value.
        let below = self.boundaries.partition_point(|b| *b < value);
        if self.dimension.is_counting() {
            Some(below)
        } else if value < self.boundaries[0] {
            None
        } else {
            Some(below.saturating_sub(1))
        }
    }

    fn bin_range(&self, bin: usize) -> String {
        let unit = self.dimension.unit();
        if self.dimension.is_counting() {
            let lower = if bin == 0 { 0.0 } else { self.boundaries[bin - 1] + 1.0 };
            format!("{} [{}, {}]", self.dimension, lower, self.boundaries[bin])
        } else {
            let open = if bin == 0 { '[' } else { '(' };
            format!(
                "{} {}{}, {}]{}{}",
                self.dimension,
                open,
                self.boundaries[bin],
                self.boundaries[bin + 1],
                if unit.is_empty() { "" } else { " " },
                unit
            )
        }
    }
}

/// Ordered set of phase-space discretizations for one tally.
///
/// Mutation happens only during setup; lookups are read-only and may be
/// shared freely across threads.
#[derive(Debug, Clone)]
pub struct PhaseSpaceBinSet {
    owner: TallyId,
    owner_kind: &'static str,
    supported: &'static [PhaseSpaceDimension],
    dimensions: Vec<Discretization>,
}

impl PhaseSpaceBinSet {
    /// Empty bin set (one bin covering everything) for tally `owner` of the
    /// named kind, restricted to the `supported` dimensions.
    pub fn new(
        owner: TallyId,
        owner_kind: &'static str,
        supported: &'static [PhaseSpaceDimension],
    ) -> Self {
        Self {
            owner,
            owner_kind,
            supported,
            dimensions: Vec::new(),
        }
    }

    pub fn supports(&self, dimension: PhaseSpaceDimension) -> bool {
        self.supported.contains(&dimension)
    }

    /// Assign (or replace) the boundaries of one dimension.
    ///
    /// Fails with [`TallyError::UnsupportedDimension`] when the owning tally
    /// kind cannot bin on `dimension`, and with
    /// [`TallyError::InvalidBinBoundaries`] when the boundaries are malformed.
    /// On failure the bin set is unchanged.
    pub fn assign_bin_boundaries(
        &mut self,
        dimension: PhaseSpaceDimension,
        boundaries: &[f64],
    ) -> Result<(), TallyError> {
        if !self.supports(dimension) {
            return Err(TallyError::UnsupportedDimension {
                tally: self.owner,
                dimension,
                kind: self.owner_kind,
            });
        }
        self.validate(dimension, boundaries)?;

        let discretization = Discretization {
            dimension,
            boundaries: boundaries.to_vec(),
        };
        match self.dimensions.iter_mut().find(|d| d.dimension == dimension) {
            Some(existing) => *existing = discretization,
            None => self.dimensions.push(discretization),
        }
        Ok(())
    }

    fn validate(&self, dimension: PhaseSpaceDimension, boundaries: &[f64]) -> Result<(), TallyError> {
        let invalid = |reason: String| TallyError::InvalidBinBoundaries {
            tally: self.owner,
            dimension,
            reason,
        };

        let minimum = if dimension.is_counting() { 1 } else { 2 };
        if boundaries.len() < minimum {
            return Err(invalid(format!(
                "at least {minimum} boundaries required, got {}",
                boundaries.len()
            )));
        }
        if let Some(b) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(invalid(format!("non-finite boundary {b}")));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("not strictly ascending".to_string()));
        }

        let first = boundaries[0];
        let last = boundaries[boundaries.len() - 1];
        match dimension {
            PhaseSpaceDimension::Energy
            | PhaseSpaceDimension::Time
            | PhaseSpaceDimension::SourceEnergy
            | PhaseSpaceDimension::SourceTime
                if first < 0.0 =>
            {
                Err(invalid(format!("negative boundary {first}")))
            }
            PhaseSpaceDimension::Cosine if first < -1.0 || last > 1.0 => {
                Err(invalid(format!("boundaries [{first}, {last}] leave [-1, 1]")))
            }
            PhaseSpaceDimension::CollisionNumber | PhaseSpaceDimension::SourceId
                if first < 0.0 || boundaries.iter().any(|b| b.fract() != 0.0) =>
            {
                Err(invalid("boundaries must be non-negative integers".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Boundaries of `dimension`, if assigned.
    pub fn boundaries(&self, dimension: PhaseSpaceDimension) -> Option<&[f64]> {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map(|d| d.boundaries.as_slice())
    }

    /// Assigned dimensions in flat-index order.
    pub fn dimensions(&self) -> impl Iterator<Item = (PhaseSpaceDimension, &[f64])> {
        self.dimensions
            .iter()
            .map(|d| (d.dimension, d.boundaries.as_slice()))
    }

    /// Number of bins of one dimension (1 if unassigned).
    pub fn number_of_dimension_bins(&self, dimension: PhaseSpaceDimension) -> usize {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map_or(1, Discretization::number_of_bins)
    }

    /// Product of the per-dimension bin counts.
    pub fn number_of_phase_space_bins(&self) -> usize {
        self.dimensions
            .iter()
            .map(Discretization::number_of_bins)
            .product()
    }

    /// Total flat bins for `response_functions` response functions.
    pub fn number_of_bins(&self, response_functions: usize) -> usize {
        self.number_of_phase_space_bins() * response_functions
    }

    pub fn is_point_in_phase_space(&self, point: &PhaseSpacePoint) -> bool {
        self.phase_space_index(point).is_some()
    }

    /// Flat phase-space index of `point` (response function 0), or `None` if
    /// any dimension's value lies outside its boundaries.
    pub fn phase_space_index(&self, point: &PhaseSpacePoint) -> Option<usize> {
        let mut index = 0;
        let mut stride = 1;
        for d in &self.dimensions {
            let bin = d.bin_index(point.value(d.dimension)?)?;
            index += bin * stride;
            stride *= d.number_of_bins();
        }
        Some(index)
    }

    /// Flat bin index of `point` for response function `response_index`.
    pub fn calculate_bin_index(
        &self,
        point: &PhaseSpacePoint,
        response_index: usize,
    ) -> Option<usize> {
        self.phase_space_index(point)
            .map(|i| i + response_index * self.number_of_phase_space_bins())
    }

    /// Human-readable description of a flat bin.
    pub fn bin_name(&self, flat_index: usize, response_names: &[&str]) -> String {
        let phase_bins = self.number_of_phase_space_bins();
        let response = flat_index / phase_bins;
        let mut rest = flat_index % phase_bins;

        let mut parts: Vec<String> = Vec::with_capacity(self.dimensions.len() + 1);
        for d in &self.dimensions {
            let n = d.number_of_bins();
            parts.push(d.bin_range(rest % n));
            rest /= n;
        }
        if response_names.len() > 1 || parts.is_empty() {
            let name = response_names.get(response).copied().unwrap_or("?");
            parts.push(format!("response {name}"));
        }
        parts.join(", ")
    }
}
