//! Per-thread, per-history scratch state.

use std::collections::BTreeMap;

use crate::particle::ParticleState;
use crate::registry::EntityId;

/// Handle identifying the calling worker thread's tracker slot.
///
/// Owned by the caller's thread pool and passed to every hot-path call; a
/// tally with `n` slots accepts ids `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadContext {
    id: usize,
}

impl ThreadContext {
    pub const MAIN: ThreadContext = ThreadContext { id: 0 };

    pub fn new(id: usize) -> Self {
        Self { id }
    }

    pub fn id(self) -> usize {
        self.id
    }
}

/// Whole-history energy and charge deposited in one cell, with the source
/// attributes of the history that deposited them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Deposition {
    pub energy: f64,
    pub charge: f64,
    pub source_energy: f64,
    pub source_time: f64,
    pub source_id: u64,
}

/// One thread's contributions for the history it is currently running.
#[derive(Debug, Default)]
pub struct UpdateTracker {
    contributions: BTreeMap<EntityId, BTreeMap<usize, f64>>,
    depositions: BTreeMap<EntityId, Deposition>,
    uncommitted: bool,
}

impl UpdateTracker {
    /// Accumulate `value` into the (entity, bin) entry.
    pub fn add(&mut self, entity: EntityId, bin: usize, value: f64) {
        *self
            .contributions
            .entry(entity)
            .or_default()
            .entry(bin)
            .or_insert(0.0) += value;
        self.uncommitted = true;
    }

    /// Accumulate a signed deposition made by `particle` into `entity`'s
    /// history total.
    pub fn deposit(&mut self, entity: EntityId, energy: f64, charge: f64, particle: &ParticleState) {
        let d = self.depositions.entry(entity).or_default();
        d.energy += energy;
        d.charge += charge;
        d.source_energy = particle.source_energy;
        d.source_time = particle.source_time;
        d.source_id = particle.source_id;
        self.uncommitted = true;
    }

    pub fn has_uncommitted(&self) -> bool {
        self.uncommitted
    }

    /// Remove and return the buffered depositions.
    pub fn take_depositions(&mut self) -> BTreeMap<EntityId, Deposition> {
        std::mem::take(&mut self.depositions)
    }

    /// Remove and return the buffered bin contributions, leaving the tracker
    /// empty and committed.
    pub fn take_contributions(&mut self) -> BTreeMap<EntityId, BTreeMap<usize, f64>> {
        self.depositions.clear();
        self.uncommitted = false;
        std::mem::take(&mut self.contributions)
    }

    pub fn clear(&mut self) {
        self.contributions.clear();
        self.depositions.clear();
        self.uncommitted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleType;

    fn electron() -> ParticleState {
        ParticleState::new(ParticleType::Electron)
    }

    #[test]
    fn accumulates_per_entity_bin() {
        let mut t = UpdateTracker::default();
        assert!(!t.has_uncommitted());
        t.add(EntityId(1), 0, 1.0);
        t.add(EntityId(1), 0, 2.5);
        t.add(EntityId(1), 3, 1.0);
        t.add(EntityId(2), 0, 4.0);
        assert!(t.has_uncommitted());

        let c = t.take_contributions();
        assert_eq!(c[&EntityId(1)][&0], 3.5);
        assert_eq!(c[&EntityId(1)][&3], 1.0);
        assert_eq!(c[&EntityId(2)][&0], 4.0);
        assert!(!t.has_uncommitted());
        assert!(t.take_contributions().is_empty());
    }

    #[test]
    fn deposition_nets_entry_and_exit() {
        let mut t = UpdateTracker::default();
        let p = electron().with_source(6.0, 0.0, 2);
        t.deposit(EntityId(5), 1.0, -1.0, &p);
        t.deposit(EntityId(5), -0.4, 1.0, &p);
        let d = t.take_depositions();
        assert!((d[&EntityId(5)].energy - 0.6).abs() < 1e-15);
        assert_eq!(d[&EntityId(5)].charge, 0.0);
        assert_eq!(d[&EntityId(5)].source_energy, 6.0);
        assert_eq!(d[&EntityId(5)].source_id, 2);
    }

    #[test]
    fn clear_discards_everything() {
        let mut t = UpdateTracker::default();
        t.add(EntityId(1), 0, 1.0);
        t.deposit(EntityId(1), 1.0, 0.0, &electron());
        t.clear();
        assert!(!t.has_uncommitted());
        assert!(t.take_depositions().is_empty());
    }

    #[test]
    fn context_ids() {
        assert_eq!(ThreadContext::MAIN.id(), 0);
        assert_eq!(ThreadContext::new(3).id(), 3);
    }
}
