//! Read-only export of a tally's raw data, and text summaries.

use serde::{Deserialize, Serialize};

use crate::error::TallyId;
use crate::kinds::TallyKind;
use crate::moments::MomentRecord;
use crate::particle::{ContributionMultiplier, ParticleType};
use crate::phase_space::PhaseSpaceDimension;
use crate::registry::EntityId;
use crate::statistics::RunStatistics;
use crate::tally::Tally;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSnapshot {
    pub dimension: PhaseSpaceDimension,
    pub boundaries: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub normalization_constant: f64,
    pub bins: Vec<MomentRecord>,
    pub totals: Vec<MomentRecord>,
}

/// Everything the persistence layer needs to store a tally's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallySnapshot {
    pub id: TallyId,
    pub kind: TallyKind,
    pub multiplier: f64,
    pub contribution: ContributionMultiplier,
    pub particle_types: Vec<ParticleType>,
    pub response_functions: Vec<String>,
    pub dimensions: Vec<DimensionSnapshot>,
    pub total_normalization_constant: f64,
    /// Sorted by entity id.
    pub entities: Vec<EntitySnapshot>,
    pub total_bins: Vec<MomentRecord>,
    pub totals: Vec<MomentRecord>,
}

impl Tally {
    /// Copy out the raw moments and configuration. Take it after a reduction
    /// or between histories.
    pub fn snapshot(&self) -> TallySnapshot {
        let store = self.store();
        let entities = store
            .entities()
            .map(|(id, moments)| EntitySnapshot {
                id,
                normalization_constant: self.normalization_constant(id).unwrap_or(1.0),
                bins: moments.bins.clone(),
                totals: moments.totals.clone(),
            })
            .collect();

        TallySnapshot {
            id: self.id(),
            kind: self.kind(),
            multiplier: self.multiplier(),
            contribution: self.options().contribution,
            particle_types: self.particle_types().to_vec(),
            response_functions: self.response_names().into_iter().map(String::from).collect(),
            dimensions: self
                .bin_set()
                .dimensions()
                .map(|(dimension, boundaries)| DimensionSnapshot {
                    dimension,
                    boundaries: boundaries.to_vec(),
                })
                .collect(),
            total_normalization_constant: self.total_normalization_constant(),
            entities,
            total_bins: store.total_bins().to_vec(),
            totals: store.totals().to_vec(),
        }
    }

    /// Text report of the processed estimates.
    pub fn summary(&self, run: &RunStatistics) -> String {
        let names = self.response_names();
        let mut out = String::new();
        let rule = "-".repeat(72);

        out.push_str(&format!(
            "Tally {} ({}) | {} histories | {:.3}s | multiplier {}\n",
            self.id(),
            self.kind(),
            run.histories,
            run.elapsed.as_secs_f64(),
            self.multiplier()
        ));
        out.push_str(&format!(
            "{:<40} {:>12} {:>8} {:>10}\n",
            "Bin", "Mean", "RE", "FOM"
        ));
        out.push_str(&rule);
        out.push('\n');

        for &entity in self.entity_ids() {
            let Ok(bins) = self.entity_bin_estimates(entity, run) else {
                continue;
            };
            out.push_str(&format!("entity {entity}\n"));
            for (i, est) in bins.iter().enumerate() {
                out.push_str(&format!(
                    "  {:<38} {:>12.5e} {:>8.4} {:>10.3e}\n",
                    self.bin_set().bin_name(i, &names),
                    est.mean,
                    est.relative_error,
                    est.figure_of_merit
                ));
            }
            if let Ok(totals) = self.entity_total_estimates(entity, run) {
                for (name, est) in names.iter().zip(totals) {
                    out.push_str(&format!(
                        "  {:<38} {:>12.5e} {:>8.4} {:>10.3e}  VOV {:.4}\n",
                        format!("total ({name})"),
                        est.mean,
                        est.relative_error,
                        est.figure_of_merit,
                        est.variance_of_variance
                    ));
                }
            }
        }

        out.push_str(&rule);
        out.push('\n');
        for (name, est) in names.iter().zip(self.total_estimates(run)) {
            out.push_str(&format!(
                "{:<40} {:>12.5e} {:>8.4} {:>10.3e}  VOV {:.4}\n",
                format!("all entities ({name})"),
                est.mean,
                est.relative_error,
                est.figure_of_merit,
                est.variance_of_variance
            ));
        }
        out
    }

    /// Emit [`Tally::summary`] at info level.
    pub fn log_summary(&self, run: &RunStatistics) {
        for line in self.summary(run).lines() {
            log::info!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::particle::ParticleState;
    use crate::tracker::ThreadContext;

    fn scored_tally() -> Tally {
        let mut t = Tally::new(
            11,
            TallyKind::CellTrackLengthFlux,
            &[(EntityId(4), 2.0), (EntityId(2), 1.0)],
        )
        .unwrap();
        t.set_particle_types(&[ParticleType::Neutron]).unwrap();
        t.set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 1.0, 20.0])
            .unwrap();
        let n = ParticleState::new(ParticleType::Neutron).with_energy(2.0);
        t.on_subtrack_end(ThreadContext::MAIN, EntityId(4), &n, 1.5);
        t.commit_history_contribution(ThreadContext::MAIN);
        t
    }

    #[test]
    fn snapshot_contents() {
        let snap = scored_tally().snapshot();
        assert_eq!(snap.id, 11);
        assert_eq!(snap.kind, TallyKind::CellTrackLengthFlux);
        assert_eq!(snap.response_functions, vec!["unit".to_string()]);
        assert_eq!(snap.dimensions.len(), 1);
        assert_eq!(snap.dimensions[0].boundaries, vec![0.0, 1.0, 20.0]);
        assert_eq!(snap.total_normalization_constant, 3.0);
        // sorted by id
        assert_eq!(snap.entities[0].id, EntityId(2));
        assert_eq!(snap.entities[1].normalization_constant, 2.0);
        assert_eq!(snap.entities[1].bins[1].m1, 1.5);
        assert_eq!(snap.totals[0].m1, 1.5);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = scored_tally().snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"kind\":\"cell_track_length_flux\""));
        let back: TallySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn summary_lists_every_entity() {
        let run = RunStatistics::new(1, Duration::from_millis(10));
        let text = scored_tally().summary(&run);
        assert!(text.contains("Tally 11 (cell track-length flux)"));
        assert!(text.contains("entity 4"));
        assert!(text.contains("entity 2"));
        assert!(text.contains("energy (1, 20] MeV"));
        assert!(text.contains("all entities (unit)"));
    }
}
