//! Particle attributes consumed by the tally engine.
//!
//! The physics engine owns the real particle; tallies only read the handful
//! of attributes collected in [`ParticleState`].

use serde::{Deserialize, Serialize};

/// Transported particle species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleType {
    Photon,
    Neutron,
    Electron,
    Positron,
    AdjointPhoton,
    AdjointNeutron,
    AdjointElectron,
}

impl ParticleType {
    /// Charge in units of the elementary charge.
    pub fn charge(self) -> f64 {
        match self {
            Self::Electron | Self::AdjointElectron => -1.0,
            Self::Positron => 1.0,
            _ => 0.0,
        }
    }

    /// Whether the species belongs to the coupled photon-electron family that
    /// deposits energy through showers.
    pub fn is_photon_electron_family(self) -> bool {
        matches!(self, Self::Photon | Self::Electron | Self::Positron)
    }
}

impl std::fmt::Display for ParticleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Photon => write!(f, "photon"),
            Self::Neutron => write!(f, "neutron"),
            Self::Electron => write!(f, "electron"),
            Self::Positron => write!(f, "positron"),
            Self::AdjointPhoton => write!(f, "adjoint_photon"),
            Self::AdjointNeutron => write!(f, "adjoint_neutron"),
            Self::AdjointElectron => write!(f, "adjoint_electron"),
        }
    }
}

/// Snapshot of the particle attributes a tally may bin or weight on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleState {
    pub particle_type: ParticleType,
    /// Kinetic energy (MeV).
    pub energy: f64,
    /// Statistical weight.
    pub weight: f64,
    /// Time since the source event (s).
    pub time: f64,
    /// Number of collisions undergone so far.
    pub collision_number: u32,
    pub position: [f64; 3],
    /// Unit direction of flight.
    pub direction: [f64; 3],
    /// Birth energy of the history's source particle (MeV).
    #[serde(default)]
    pub source_energy: f64,
    /// Birth time of the history's source particle (s).
    #[serde(default)]
    pub source_time: f64,
    #[serde(default)]
    pub source_id: u64,
}

impl ParticleState {
    /// Unit-weight particle of the given type at rest at the origin.
    pub fn new(particle_type: ParticleType) -> Self {
        Self {
            particle_type,
            energy: 0.0,
            weight: 1.0,
            time: 0.0,
            collision_number: 0,
            position: [0.0; 3],
            direction: [0.0, 0.0, 1.0],
            source_energy: 0.0,
            source_time: 0.0,
            source_id: 0,
        }
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = energy;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn with_collision_number(mut self, collision_number: u32) -> Self {
        self.collision_number = collision_number;
        self
    }

    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn with_direction(mut self, direction: [f64; 3]) -> Self {
        self.direction = direction;
        self
    }

    /// Record the source event that started this particle's history.
    pub fn with_source(mut self, energy: f64, time: f64, id: u64) -> Self {
        self.source_energy = energy;
        self.source_time = time;
        self.source_id = id;
        self
    }

    /// Charge carried by this particle (weight not included).
    pub fn charge(&self) -> f64 {
        self.particle_type.charge()
    }
}

/// How the particle's state scales a raw tally contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionMultiplier {
    /// Particle weight (particle counts, flux).
    #[default]
    Weight,
    /// Weight times energy (energy flux, energy deposition).
    WeightAndEnergy,
    /// Weight times charge (charge current, charge deposition).
    WeightAndCharge,
}

impl ContributionMultiplier {
    /// Multiplier the policy applies to one event of `particle`.
    pub fn evaluate(self, particle: &ParticleState) -> f64 {
        match self {
            Self::Weight => particle.weight,
            Self::WeightAndEnergy => particle.weight * particle.energy,
            Self::WeightAndCharge => particle.weight * particle.charge(),
        }
    }
}

impl std::fmt::Display for ContributionMultiplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weight => write!(f, "weight"),
            Self::WeightAndEnergy => write!(f, "weight*energy"),
            Self::WeightAndCharge => write!(f, "weight*charge"),
        }
    }
}
