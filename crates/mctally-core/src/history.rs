//! Moment snapshots taken during a run, for convergence analysis.
//!
//! A snapshot copies the raw moments at one point of the run together with
//! the number of histories and the elapsed time at that point. Processing a
//! snapshot with its own run statistics gives the estimate the tally would
//! have reported had the run stopped there.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::moments::{MomentRecord, MomentStore};
use crate::registry::EntityId;
use crate::statistics::RunStatistics;

/// Raw moments of one entity at a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMomentSnapshot {
    pub id: EntityId,
    /// Empty unless snapshots on entity bins are enabled.
    pub bins: Vec<MomentRecord>,
    pub totals: Vec<MomentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentSnapshot {
    pub histories: u64,
    pub elapsed: Duration,
    /// Sorted by entity id.
    pub entities: Vec<EntityMomentSnapshot>,
    pub total_bins: Vec<MomentRecord>,
    pub totals: Vec<MomentRecord>,
}

impl MomentSnapshot {
    pub fn capture(store: &MomentStore, run: &RunStatistics, entity_bins: bool) -> Self {
        Self {
            histories: run.histories,
            elapsed: run.elapsed,
            entities: store
                .entities()
                .map(|(id, moments)| EntityMomentSnapshot {
                    id,
                    bins: if entity_bins {
                        moments.bins.clone()
                    } else {
                        Vec::new()
                    },
                    totals: moments.totals.clone(),
                })
                .collect(),
            total_bins: store.total_bins().to_vec(),
            totals: store.totals().to_vec(),
        }
    }

    /// Run statistics at the moment the snapshot was taken.
    pub fn run(&self) -> RunStatistics {
        RunStatistics::new(self.histories, self.elapsed)
    }

    pub fn entity(&self, entity: EntityId) -> Option<&EntityMomentSnapshot> {
        self.entities
            .binary_search_by_key(&entity, |e| e.id)
            .ok()
            .map(|i| &self.entities[i])
    }
}
