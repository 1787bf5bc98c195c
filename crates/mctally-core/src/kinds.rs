//! Tally kinds and the physical events that drive them.
//!
//! Every kind shares one accumulation engine; a kind is only a set of
//! capabilities (which dimensions it bins on, which responses and particle
//! types it accepts) plus the rule turning an observed event into a raw
//! contribution.

use serde::{Deserialize, Serialize};

use crate::config::TallyOptions;
use crate::particle::{ParticleState, ParticleType};
use crate::phase_space::PhaseSpaceDimension;

/// A physical event reported by the transport engine for one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TallyEvent {
    /// Collision inside a cell.
    Collision { inverse_total_cross_section: f64 },
    /// End of a straight track segment inside a cell or mesh element.
    SubtrackEnd { track_length: f64 },
    CellEntry,
    CellExit,
    /// Crossing of a surface at the given cosine to its normal.
    SurfaceCrossing { angle_cosine: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyKind {
    CellCollisionFlux,
    CellTrackLengthFlux,
    CellPulseHeight,
    SurfaceFlux,
    SurfaceCurrent,
    MeshTrackLengthFlux,
}

const CELL_DIMENSIONS: &[PhaseSpaceDimension] = &[
    PhaseSpaceDimension::Energy,
    PhaseSpaceDimension::Time,
    PhaseSpaceDimension::CollisionNumber,
    PhaseSpaceDimension::SourceEnergy,
    PhaseSpaceDimension::SourceTime,
    PhaseSpaceDimension::SourceId,
];

const SURFACE_DIMENSIONS: &[PhaseSpaceDimension] = &[
    PhaseSpaceDimension::Energy,
    PhaseSpaceDimension::Time,
    PhaseSpaceDimension::CollisionNumber,
    PhaseSpaceDimension::Cosine,
    PhaseSpaceDimension::SourceEnergy,
    PhaseSpaceDimension::SourceTime,
    PhaseSpaceDimension::SourceId,
];

// Deposited energy plus the attributes shared by every particle of a history.
const PULSE_HEIGHT_DIMENSIONS: &[PhaseSpaceDimension] = &[
    PhaseSpaceDimension::Energy,
    PhaseSpaceDimension::SourceEnergy,
    PhaseSpaceDimension::SourceTime,
    PhaseSpaceDimension::SourceId,
];

const PHOTON_ELECTRON_FAMILY: [ParticleType; 3] = [
    ParticleType::Photon,
    ParticleType::Electron,
    ParticleType::Positron,
];

impl TallyKind {
    pub const ALL: [TallyKind; 6] = [
        Self::CellCollisionFlux,
        Self::CellTrackLengthFlux,
        Self::CellPulseHeight,
        Self::SurfaceFlux,
        Self::SurfaceCurrent,
        Self::MeshTrackLengthFlux,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CellCollisionFlux => "cell collision flux",
            Self::CellTrackLengthFlux => "cell track-length flux",
            Self::CellPulseHeight => "cell pulse height",
            Self::SurfaceFlux => "surface flux",
            Self::SurfaceCurrent => "surface current",
            Self::MeshTrackLengthFlux => "mesh track-length flux",
        }
    }

    pub fn supported_dimensions(self) -> &'static [PhaseSpaceDimension] {
        match self {
            Self::CellPulseHeight => PULSE_HEIGHT_DIMENSIONS,
            Self::SurfaceFlux | Self::SurfaceCurrent => SURFACE_DIMENSIONS,
            _ => CELL_DIMENSIONS,
        }
    }

    pub fn is_pulse_height(self) -> bool {
        self == Self::CellPulseHeight
    }

    pub fn is_surface(self) -> bool {
        matches!(self, Self::SurfaceFlux | Self::SurfaceCurrent)
    }

    pub fn is_mesh(self) -> bool {
        self == Self::MeshTrackLengthFlux
    }

    pub fn accepts_response_functions(self) -> bool {
        !self.is_pulse_height()
    }

    /// Track-length style kinds integrate along a segment and assume the
    /// response is constant over it.
    pub fn requires_uniform_response(self) -> bool {
        matches!(self, Self::CellTrackLengthFlux | Self::MeshTrackLengthFlux)
    }

    /// Resolve a requested particle type list into the admissible one.
    ///
    /// Returns the corrected list and, when the request had to be changed, a
    /// description of the change for the caller to log. An empty request
    /// yields an empty list.
    pub fn admissible_particle_types(
        self,
        requested: &[ParticleType],
    ) -> (Vec<ParticleType>, Option<String>) {
        let Some(&first) = requested.first() else {
            return (Vec::new(), None);
        };

        if self.is_pulse_height() {
            let rejected: Vec<String> = requested
                .iter()
                .filter(|t| !t.is_photon_electron_family())
                .map(ToString::to_string)
                .collect();
            if requested.iter().any(|t| t.is_photon_electron_family()) {
                let note = (!rejected.is_empty()).then(|| {
                    format!("ignoring {}; only photon/electron/positron deposit", rejected.join(", "))
                });
                return (PHOTON_ELECTRON_FAMILY.to_vec(), note);
            }
            return (
                Vec::new(),
                Some(format!("ignoring {}; only photon/electron/positron deposit", rejected.join(", "))),
            );
        }

        let mut distinct = requested.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() > 1 {
            let dropped: Vec<String> = requested
                .iter()
                .filter(|t| **t != first)
                .map(ToString::to_string)
                .collect();
            return (
                vec![first],
                Some(format!("only one particle type allowed, keeping {first} and ignoring {}", dropped.join(", "))),
            );
        }
        (vec![first], None)
    }

    /// Raw contribution of `event` for this kind, or `None` when this kind
    /// does not observe the event. Pulse-height deposition is handled
    /// separately and always yields `None` here.
    pub fn raw_contribution(
        self,
        event: &TallyEvent,
        particle: &ParticleState,
        options: &TallyOptions,
    ) -> Option<f64> {
        let policy = options.contribution.evaluate(particle);
        match (self, *event) {
            (
                Self::CellCollisionFlux,
                TallyEvent::Collision {
                    inverse_total_cross_section,
                },
            ) => Some(policy * inverse_total_cross_section),
            (
                Self::CellTrackLengthFlux | Self::MeshTrackLengthFlux,
                TallyEvent::SubtrackEnd { track_length },
            ) => Some(policy * track_length),
            (Self::SurfaceCurrent, TallyEvent::SurfaceCrossing { .. }) => Some(policy),
            (Self::SurfaceFlux, TallyEvent::SurfaceCrossing { angle_cosine }) => {
                let mu = angle_cosine.abs();
                if mu > options.cosine_cutoff {
                    Some(policy / mu)
                } else {
                    Some(policy * 2.0 / options.cosine_cutoff)
                }
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for TallyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ContributionMultiplier;

    fn photon() -> ParticleState {
        ParticleState::new(ParticleType::Photon)
            .with_energy(2.0)
            .with_weight(0.5)
    }

    // -----------------------------------------------------------------------
    // Raw contributions
    // -----------------------------------------------------------------------

    #[test]
    fn collision_and_track_length() {
        let opts = TallyOptions::default();
        let p = photon();
        assert_eq!(
            TallyKind::CellCollisionFlux.raw_contribution(
                &TallyEvent::Collision { inverse_total_cross_section: 4.0 },
                &p,
                &opts
            ),
            Some(2.0)
        );
        let track = TallyEvent::SubtrackEnd { track_length: 3.0 };
        assert_eq!(TallyKind::CellTrackLengthFlux.raw_contribution(&track, &p, &opts), Some(1.5));
        assert_eq!(TallyKind::MeshTrackLengthFlux.raw_contribution(&track, &p, &opts), Some(1.5));
        assert_eq!(TallyKind::CellCollisionFlux.raw_contribution(&track, &p, &opts), None);
    }

    #[test]
    fn surface_flux_cosine_rule() {
        let opts = TallyOptions::default().with_contribution(ContributionMultiplier::WeightAndEnergy);
        let p = photon();
        let crossing = |mu| TallyEvent::SurfaceCrossing { angle_cosine: mu };

        assert_eq!(TallyKind::SurfaceFlux.raw_contribution(&crossing(-0.5), &p, &opts), Some(2.0));
        // grazing: 2 / cutoff
        let grazing = TallyKind::SurfaceFlux
            .raw_contribution(&crossing(0.0005), &p, &opts)
            .unwrap();
        assert!((grazing - 2000.0).abs() < 1e-9);
        assert_eq!(TallyKind::SurfaceCurrent.raw_contribution(&crossing(0.1), &p, &opts), Some(1.0));
    }

    #[test]
    fn pulse_height_observes_nothing_directly() {
        let opts = TallyOptions::default();
        for event in [TallyEvent::CellEntry, TallyEvent::CellExit] {
            assert_eq!(TallyKind::CellPulseHeight.raw_contribution(&event, &photon(), &opts), None);
        }
    }

    // -----------------------------------------------------------------------
    // Capabilities
    // -----------------------------------------------------------------------

    #[test]
    fn dimension_support() {
        use PhaseSpaceDimension::*;
        assert!(!TallyKind::CellTrackLengthFlux.supported_dimensions().contains(&Cosine));
        assert!(TallyKind::SurfaceCurrent.supported_dimensions().contains(&Cosine));
        assert!(!TallyKind::CellPulseHeight.supported_dimensions().contains(&Time));
        assert!(!TallyKind::CellPulseHeight.supported_dimensions().contains(&CollisionNumber));
    }

    #[test]
    fn every_kind_bins_on_source_attributes() {
        use PhaseSpaceDimension::*;
        for kind in TallyKind::ALL {
            for dimension in [SourceEnergy, SourceTime, SourceId] {
                assert!(
                    kind.supported_dimensions().contains(&dimension),
                    "{kind} should support {dimension}"
                );
            }
        }
    }

    #[test]
    fn single_type_kinds_truncate() {
        let (types, note) = TallyKind::CellCollisionFlux
            .admissible_particle_types(&[ParticleType::Neutron, ParticleType::Photon]);
        assert_eq!(types, vec![ParticleType::Neutron]);
        assert!(note.unwrap().contains("photon"));

        let (types, note) = TallyKind::SurfaceFlux
            .admissible_particle_types(&[ParticleType::Photon, ParticleType::Photon]);
        assert_eq!(types, vec![ParticleType::Photon]);
        assert!(note.is_none());
    }

    #[test]
    fn pulse_height_assigns_family() {
        let (types, note) =
            TallyKind::CellPulseHeight.admissible_particle_types(&[ParticleType::Electron]);
        assert_eq!(types.len(), 3);
        assert!(types.contains(&ParticleType::Positron));
        assert!(note.is_none());

        let (types, note) =
            TallyKind::CellPulseHeight.admissible_particle_types(&[ParticleType::Neutron]);
        assert!(types.is_empty());
        assert!(note.unwrap().contains("neutron"));
    }
}
