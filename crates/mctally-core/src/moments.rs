//! Running first-through-fourth moment storage and the commit fold.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::histogram::ScoreHistogram;
use crate::registry::EntityId;

/// Running sums of a per-history score and its powers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentRecord {
    pub m1: f64,
    pub m2: f64,
    pub m3: f64,
    pub m4: f64,
}

impl MomentRecord {
    /// Number of `f64` components in a flattened record.
    pub const WIDTH: usize = 4;

    /// Fold one history's score into the record.
    pub fn add_sample(&mut self, value: f64) {
        let v2 = value * value;
        self.m1 += value;
        self.m2 += v2;
        self.m3 += v2 * value;
        self.m4 += v2 * v2;
    }

    /// Component-wise sum, used when combining ranks.
    pub fn merge(&mut self, other: &MomentRecord) {
        self.m1 += other.m1;
        self.m2 += other.m2;
        self.m3 += other.m3;
        self.m4 += other.m4;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn to_array(self) -> [f64; 4] {
        [self.m1, self.m2, self.m3, self.m4]
    }

    fn from_slice(values: &[f64]) -> Self {
        Self {
            m1: values[0],
            m2: values[1],
            m3: values[2],
            m4: values[3],
        }
    }
}

/// Moments owned by one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMoments {
    /// One record per flat bin.
    pub bins: Vec<MomentRecord>,
    /// One record per response function: the entity's whole-history score.
    pub totals: Vec<MomentRecord>,
    /// Score histogram per flat bin; empty unless entity-bin histograms are on.
    pub bin_histograms: Vec<ScoreHistogram>,
    /// Score histogram per response function; empty unless histograms are on.
    pub total_histograms: Vec<ScoreHistogram>,
}

impl EntityMoments {
    fn new(bins: usize, responses: usize, histograms: Option<&HistogramLayout>) -> Self {
        Self {
            bins: vec![MomentRecord::default(); bins],
            totals: vec![MomentRecord::default(); responses],
            bin_histograms: histograms
                .filter(|h| h.on_entity_bins)
                .map_or_else(Vec::new, |h| h.allocate(bins)),
            total_histograms: histograms.map_or_else(Vec::new, |h| h.allocate(responses)),
        }
    }
}

/// Which records carry a score histogram, and over which boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramLayout {
    pub template: ScoreHistogram,
    /// Entity bins are opt-in on top of the totals and total bins.
    pub on_entity_bins: bool,
}

impl HistogramLayout {
    fn allocate(&self, n: usize) -> Vec<ScoreHistogram> {
        let mut empty = self.template.clone();
        empty.reset();
        vec![empty; n]
    }
}

/// Every moment record a tally owns.
///
/// Entities are kept sorted by id so that flattening is deterministic across
/// ranks that registered the same entities in a different order.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentStore {
    phase_bins: usize,
    responses: usize,
    entities: BTreeMap<EntityId, EntityMoments>,
    total_bins: Vec<MomentRecord>,
    totals: Vec<MomentRecord>,
    histograms: Option<HistogramLayout>,
    total_bin_histograms: Vec<ScoreHistogram>,
    total_histograms: Vec<ScoreHistogram>,
}

impl MomentStore {
    pub fn new(entities: &[EntityId], phase_bins: usize, responses: usize) -> Self {
        Self::with_histograms(entities, phase_bins, responses, None)
    }

    fn with_histograms(
        entities: &[EntityId],
        phase_bins: usize,
        responses: usize,
        histograms: Option<HistogramLayout>,
    ) -> Self {
        let bins = phase_bins * responses;
        let layout = histograms.as_ref();
        Self {
            phase_bins,
            responses,
            entities: entities
                .iter()
                .map(|&id| (id, EntityMoments::new(bins, responses, layout)))
                .collect(),
            total_bins: vec![MomentRecord::default(); bins],
            totals: vec![MomentRecord::default(); responses],
            total_bin_histograms: layout.map_or_else(Vec::new, |h| h.allocate(bins)),
            total_histograms: layout.map_or_else(Vec::new, |h| h.allocate(responses)),
            histograms,
        }
    }

    /// Discard everything and reallocate for a new bin layout. The histogram
    /// layout carries over.
    pub fn resize(&mut self, phase_bins: usize, responses: usize) {
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        let histograms = self.histograms.take();
        *self = Self::with_histograms(&ids, phase_bins, responses, histograms);
    }

    /// Switch score histograms on (or off with `None`). Destroys all
    /// accumulated moments.
    pub fn set_histograms(&mut self, histograms: Option<HistogramLayout>) {
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        *self = Self::with_histograms(&ids, self.phase_bins, self.responses, histograms);
    }

    pub fn histogram_layout(&self) -> Option<&HistogramLayout> {
        self.histograms.as_ref()
    }

    pub fn reset(&mut self) {
        for moments in self.entities.values_mut() {
            moments.bins.iter_mut().for_each(MomentRecord::reset);
            moments.totals.iter_mut().for_each(MomentRecord::reset);
            moments.bin_histograms.iter_mut().for_each(ScoreHistogram::reset);
            moments.total_histograms.iter_mut().for_each(ScoreHistogram::reset);
        }
        self.total_bins.iter_mut().for_each(MomentRecord::reset);
        self.totals.iter_mut().for_each(MomentRecord::reset);
        self.total_bin_histograms.iter_mut().for_each(ScoreHistogram::reset);
        self.total_histograms.iter_mut().for_each(ScoreHistogram::reset);
    }

    pub fn number_of_bins(&self) -> usize {
        self.phase_bins * self.responses
    }

    pub fn entity(&self, entity: EntityId) -> Option<&EntityMoments> {
        self.entities.get(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &EntityMoments)> {
        self.entities.iter().map(|(id, m)| (*id, m))
    }

    /// Per-bin moments summed over entities, history by history.
    pub fn total_bins(&self) -> &[MomentRecord] {
        &self.total_bins
    }

    /// Per-response-function moments of the whole-tally history score.
    pub fn totals(&self) -> &[MomentRecord] {
        &self.totals
    }

    /// Score histograms of the total bins; empty unless histograms are on.
    pub fn total_bin_histograms(&self) -> &[ScoreHistogram] {
        &self.total_bin_histograms
    }

    pub fn total_histograms(&self) -> &[ScoreHistogram] {
        &self.total_histograms
    }

    /// Fold one finished history into the store.
    ///
    /// `history` maps entity to (flat bin -> accumulated score). Every bin
    /// score is folded once into its entity bin; the same values summed per
    /// response function form the entity totals, and summed over entities
    /// they form the total-bin and global-total scores. Conservation of the
    /// first moment across the three levels follows from using one pass.
    /// Every score folded into a record also lands in that record's
    /// histogram when it has one.
    pub fn fold_history(&mut self, history: &BTreeMap<EntityId, BTreeMap<usize, f64>>) {
        let mut bin_scores: BTreeMap<usize, f64> = BTreeMap::new();
        let mut global_scores = vec![0.0; self.responses];
        let mut entity_scores = vec![0.0; self.responses];

        for (entity, bins) in history {
            let Some(moments) = self.entities.get_mut(entity) else {
                debug_assert!(false, "history touched unregistered entity {entity}");
                continue;
            };
            entity_scores.iter_mut().for_each(|s| *s = 0.0);

            for (&bin, &value) in bins {
                let Some(record) = moments.bins.get_mut(bin) else {
                    debug_assert!(false, "bin {bin} out of range");
                    continue;
                };
                record.add_sample(value);
                if let Some(histogram) = moments.bin_histograms.get_mut(bin) {
                    histogram.add_score(value);
                }
                entity_scores[bin / self.phase_bins] += value;
                *bin_scores.entry(bin).or_insert(0.0) += value;
            }

            for (rf, &score) in entity_scores.iter().enumerate() {
                if score != 0.0 {
                    moments.totals[rf].add_sample(score);
                    if let Some(histogram) = moments.total_histograms.get_mut(rf) {
                        histogram.add_score(score);
                    }
                    global_scores[rf] += score;
                }
            }
        }

        for (bin, score) in bin_scores {
            self.total_bins[bin].add_sample(score);
            if let Some(histogram) = self.total_bin_histograms.get_mut(bin) {
                histogram.add_score(score);
            }
        }
        for (rf, score) in global_scores.into_iter().enumerate() {
            if score != 0.0 {
                self.totals[rf].add_sample(score);
                if let Some(histogram) = self.total_histograms.get_mut(rf) {
                    histogram.add_score(score);
                }
            }
        }
    }

    /// Number of `f64` values produced by [`MomentStore::flatten`].
    pub fn flattened_len(&self) -> usize {
        let per_entity = self.number_of_bins() + self.responses;
        (self.entities.len() * per_entity + self.number_of_bins() + self.responses)
            * MomentRecord::WIDTH
            + self.histograms().map(ScoreHistogram::len).sum::<usize>()
    }

    fn histograms(&self) -> impl Iterator<Item = &ScoreHistogram> {
        self.entities
            .values()
            .flat_map(|m| m.bin_histograms.iter().chain(m.total_histograms.iter()))
            .chain(self.total_bin_histograms.iter())
            .chain(self.total_histograms.iter())
    }

    fn histograms_mut(&mut self) -> impl Iterator<Item = &mut ScoreHistogram> {
        self.entities
            .values_mut()
            .flat_map(|m| m.bin_histograms.iter_mut().chain(m.total_histograms.iter_mut()))
            .chain(self.total_bin_histograms.iter_mut())
            .chain(self.total_histograms.iter_mut())
    }

    fn records(&self) -> impl Iterator<Item = &MomentRecord> {
        self.entities
            .values()
            .flat_map(|m| m.bins.iter().chain(m.totals.iter()))
            .chain(self.total_bins.iter())
            .chain(self.totals.iter())
    }

    fn records_mut(&mut self) -> impl Iterator<Item = &mut MomentRecord> {
        self.entities
            .values_mut()
            .flat_map(|m| m.bins.iter_mut().chain(m.totals.iter_mut()))
            .chain(self.total_bins.iter_mut())
            .chain(self.totals.iter_mut())
    }

    /// Every record as `[m1, m2, m3, m4]` runs: entities by ascending id (bins
    /// then totals), then total bins, then global totals. Histogram counts,
    /// when enabled, follow in the same order.
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.flattened_len());
        for record in self.records() {
            out.extend_from_slice(&record.to_array());
        }
        for histogram in self.histograms() {
            histogram.extend_flat(&mut out);
        }
        out
    }

    /// Overwrite every record from a buffer laid out by [`MomentStore::flatten`].
    /// Returns `false` (leaving the store untouched) on a length mismatch.
    pub fn load(&mut self, values: &[f64]) -> bool {
        if values.len() != self.flattened_len() {
            return false;
        }
        let mut offset = 0;
        for record in self.records_mut() {
            *record = MomentRecord::from_slice(&values[offset..offset + MomentRecord::WIDTH]);
            offset += MomentRecord::WIDTH;
        }
        for histogram in self.histograms_mut() {
            let len = histogram.len();
            histogram.load_flat(&values[offset..offset + len]);
            offset += len;
        }
        true
    }
}
