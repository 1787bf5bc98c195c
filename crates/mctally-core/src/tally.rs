//! The tally: one accumulation engine shared by every tally kind.
//!
//! Lifecycle:
//! 1. Construct with entities and normalization constants
//! 2. Configure (particle types, bins, response functions, thread slots)
//! 3. Per history, on the worker's own [`ThreadContext`]: report events, then
//!    commit (or discard) exactly once
//! 4. Reduce across ranks, take a moment snapshot, export, or reset
//!
//! Steps 2 and 4 take `&mut self`; step 3 takes `&self`, so a tally is shared
//! by reference across a scoped worker pool.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::TallyOptions;
use crate::error::{TallyError, TallyId};
use crate::histogram::ScoreHistogram;
use crate::history::MomentSnapshot;
use crate::kinds::{TallyEvent, TallyKind};
use crate::mesh::MeshTrackSegmenter;
use crate::moments::{HistogramLayout, MomentRecord, MomentStore};
use crate::particle::{ContributionMultiplier, ParticleState, ParticleType};
use crate::phase_space::{PhaseSpaceBinSet, PhaseSpaceDimension, PhaseSpacePoint};
use crate::reduce::Communicator;
use crate::registry::{EntityId, EntityRegistry};
use crate::response::{SharedResponse, UnitResponse};
use crate::statistics::{self, BinEstimate, RunStatistics, TotalEstimate};
use crate::tracker::{ThreadContext, UpdateTracker};

/// Lock a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe Monte Carlo tally.
pub struct Tally {
    id: TallyId,
    kind: TallyKind,
    options: TallyOptions,
    registry: EntityRegistry,
    bins: PhaseSpaceBinSet,
    responses: Vec<SharedResponse>,
    particle_types: Vec<ParticleType>,
    store: Mutex<MomentStore>,
    slots: Vec<Mutex<UpdateTracker>>,
    snapshots: Vec<MomentSnapshot>,
    snapshots_on_entity_bins: bool,
}

impl Tally {
    /// Tally with default options over `entities` (id, normalization constant).
    pub fn new(
        id: TallyId,
        kind: TallyKind,
        entities: &[(EntityId, f64)],
    ) -> Result<Self, TallyError> {
        Self::with_options(id, kind, TallyOptions::default(), entities)
    }

    /// Tally whose entities all have normalization constant 1.
    pub fn unnormalized(
        id: TallyId,
        kind: TallyKind,
        entities: &[EntityId],
    ) -> Result<Self, TallyError> {
        let entities: Vec<(EntityId, f64)> = entities.iter().map(|&e| (e, 1.0)).collect();
        Self::new(id, kind, &entities)
    }

    pub fn with_options(
        id: TallyId,
        kind: TallyKind,
        options: TallyOptions,
        entities: &[(EntityId, f64)],
    ) -> Result<Self, TallyError> {
        options.validate()?;
        if entities.is_empty() {
            return Err(TallyError::NoEntities { tally: id });
        }
        let mut registry = EntityRegistry::new(id);
        for &(entity, normalization) in entities {
            registry.assign(entity, normalization)?;
        }
        let store = MomentStore::new(registry.ids(), 1, 1);

        Ok(Self {
            id,
            kind,
            options,
            bins: PhaseSpaceBinSet::new(id, kind.name(), kind.supported_dimensions()),
            registry,
            responses: vec![Arc::new(UnitResponse)],
            particle_types: Vec::new(),
            store: Mutex::new(store),
            slots: vec![Mutex::default()],
            snapshots: Vec::new(),
            snapshots_on_entity_bins: false,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> TallyId {
        self.id
    }

    pub fn kind(&self) -> TallyKind {
        self.kind
    }

    pub fn options(&self) -> &TallyOptions {
        &self.options
    }

    pub fn multiplier(&self) -> f64 {
        self.options.multiplier
    }

    pub fn particle_types(&self) -> &[ParticleType] {
        &self.particle_types
    }

    pub fn is_particle_type_admissible(&self, particle_type: ParticleType) -> bool {
        self.particle_types.contains(&particle_type)
    }

    pub fn entity_ids(&self) -> &[EntityId] {
        self.registry.ids()
    }

    pub fn is_entity_assigned(&self, entity: EntityId) -> bool {
        self.registry.is_assigned(entity)
    }

    pub fn normalization_constant(&self, entity: EntityId) -> Result<f64, TallyError> {
        self.registry.normalization_constant(entity)
    }

    pub fn total_normalization_constant(&self) -> f64 {
        self.registry.total_normalization_constant()
    }

    pub fn bin_set(&self) -> &PhaseSpaceBinSet {
        &self.bins
    }

    pub fn response_names(&self) -> Vec<&str> {
        self.responses.iter().map(|r| r.name()).collect()
    }

    pub fn number_of_response_functions(&self) -> usize {
        self.responses.len()
    }

    /// Flat bins per entity: phase-space bins times response functions.
    pub fn number_of_bins(&self) -> usize {
        self.bins.number_of_bins(self.responses.len())
    }

    pub fn thread_slots(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, MomentStore> {
        lock(&self.store)
    }

    fn store_mut(&mut self) -> &mut MomentStore {
        self.store.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Setup (single-threaded)
    // -----------------------------------------------------------------------

    fn ensure_committed(&self) -> Result<(), TallyError> {
        match self.uncommitted_thread_count() {
            0 => Ok(()),
            threads => Err(TallyError::UncommittedContributions {
                tally: self.id,
                threads,
            }),
        }
    }

    fn resize_store(&mut self) {
        let phase_bins = self.bins.number_of_phase_space_bins();
        let responses = self.responses.len();
        self.store_mut().resize(phase_bins, responses);
        self.snapshots.clear();
    }

    /// Allocate one tracker slot per worker thread. Contexts `0..threads` are
    /// valid afterwards.
    pub fn enable_thread_support(&mut self, threads: usize) -> Result<(), TallyError> {
        if threads == 0 {
            return Err(TallyError::InvalidOption {
                option: "threads",
                reason: "at least one thread is required".to_string(),
            });
        }
        self.ensure_committed()?;
        self.slots.resize_with(threads, Mutex::default);
        log::debug!("tally {}: thread support enabled for {threads} thread(s)", self.id);
        Ok(())
    }

    /// Assign the boundaries of one phase-space dimension.
    ///
    /// Destroys all accumulated moments. A dimension this kind cannot bin on
    /// is logged and ignored.
    pub fn set_bin_boundaries(
        &mut self,
        dimension: PhaseSpaceDimension,
        boundaries: &[f64],
    ) -> Result<(), TallyError> {
        self.ensure_committed()?;
        match self.bins.assign_bin_boundaries(dimension, boundaries) {
            Ok(()) => {}
            Err(err @ TallyError::UnsupportedDimension { .. }) => {
                log::warn!("{err}; ignoring the boundaries");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        self.resize_store();
        Ok(())
    }

    /// Replace the response functions. Destroys all accumulated moments.
    ///
    /// Pulse-height tallies ignore the request. Track-length style tallies
    /// drop spatially varying functions; if none remain the current list is
    /// kept.
    pub fn set_response_functions(
        &mut self,
        functions: Vec<SharedResponse>,
    ) -> Result<(), TallyError> {
        if functions.is_empty() {
            return Err(TallyError::NoResponseFunctions { tally: self.id });
        }
        if !self.kind.accepts_response_functions() {
            log::warn!(
                "tally {}: {} tallies do not accept response functions, ignoring {}",
                self.id,
                self.kind,
                functions.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
            );
            return Ok(());
        }
        self.ensure_committed()?;

        let functions = if self.kind.requires_uniform_response() {
            let (uniform, varying): (Vec<_>, Vec<_>) =
                functions.into_iter().partition(|f| f.is_spatially_uniform());
            for f in &varying {
                log::warn!(
                    "tally {}: response function `{}` is not spatially uniform, \
                     {} tallies cannot use it",
                    self.id,
                    f.name(),
                    self.kind
                );
            }
            if uniform.is_empty() {
                log::warn!(
                    "tally {}: no spatially uniform response functions left, keeping the current ones",
                    self.id
                );
                return Ok(());
            }
            uniform
        } else {
            functions
        };

        self.responses = functions;
        self.resize_store();
        Ok(())
    }

    /// Set the admissible particle types.
    ///
    /// Single-type kinds keep only the first type; pulse-height tallies
    /// always take the whole photon/electron/positron family.
    pub fn set_particle_types(&mut self, types: &[ParticleType]) -> Result<(), TallyError> {
        if types.is_empty() {
            return Err(TallyError::NoParticleTypes { tally: self.id });
        }
        self.ensure_committed()?;
        let (admissible, note) = self.kind.admissible_particle_types(types);
        if let Some(note) = note {
            log::warn!("tally {}: {note}", self.id);
        }
        self.particle_types = admissible;
        Ok(())
    }

    /// Histogram every committed score of the entity totals, total bins and
    /// global totals over `boundaries`. Destroys all accumulated moments.
    pub fn set_sample_moment_histogram_bins(&mut self, boundaries: &[f64]) -> Result<(), TallyError> {
        ScoreHistogram::validate_boundaries(boundaries).map_err(|reason| {
            TallyError::InvalidHistogramBoundaries {
                tally: self.id,
                reason,
            }
        })?;
        self.ensure_committed()?;
        let on_entity_bins = self
            .store_mut()
            .histogram_layout()
            .is_some_and(|h| h.on_entity_bins);
        self.store_mut().set_histograms(Some(HistogramLayout {
            template: ScoreHistogram::with_boundaries(boundaries.to_vec()),
            on_entity_bins,
        }));
        self.snapshots.clear();
        log::debug!(
            "tally {}: score histograms over {} bin(s)",
            self.id,
            boundaries.len() - 1
        );
        Ok(())
    }

    /// Extend score histograms to every entity bin. Without prior boundaries
    /// each histogram is a single bin over all finite scores. Destroys all
    /// accumulated moments.
    pub fn enable_sample_moment_histograms_on_entity_bins(&mut self) -> Result<(), TallyError> {
        self.ensure_committed()?;
        let template = self
            .store_mut()
            .histogram_layout()
            .map_or_else(ScoreHistogram::default, |h| h.template.clone());
        self.store_mut().set_histograms(Some(HistogramLayout {
            template,
            on_entity_bins: true,
        }));
        self.snapshots.clear();
        Ok(())
    }

    /// Include entity-bin moments in every later snapshot.
    pub fn enable_snapshots_on_entity_bins(&mut self) {
        self.snapshots_on_entity_bins = true;
    }

    /// Zero every moment and every tracker slot, and drop the snapshots.
    pub fn reset_data(&mut self) -> Result<(), TallyError> {
        self.ensure_committed()?;
        self.store_mut().reset();
        self.snapshots.clear();
        for slot in &mut self.slots {
            slot.get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        log::debug!("tally {}: data reset", self.id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hot path (concurrent, one history per thread)
    // -----------------------------------------------------------------------

    fn slot(&self, ctx: ThreadContext) -> Option<&Mutex<UpdateTracker>> {
        let slot = self.slots.get(ctx.id());
        debug_assert!(
            slot.is_some(),
            "tally {}: thread {} has no tracker slot ({} enabled)",
            self.id,
            ctx.id(),
            self.slots.len()
        );
        slot
    }

    /// Buffer a raw contribution for the calling thread's current history.
    ///
    /// Dropped silently if the particle type is not admissible or the
    /// particle lies outside the phase space.
    pub fn add_partial_history_contribution(
        &self,
        ctx: ThreadContext,
        entity: EntityId,
        particle: &ParticleState,
        raw_contribution: f64,
    ) {
        let point = PhaseSpacePoint::from_particle(particle);
        self.record(ctx, entity, particle, &point, raw_contribution);
    }

    fn record(
        &self,
        ctx: ThreadContext,
        entity: EntityId,
        particle: &ParticleState,
        point: &PhaseSpacePoint,
        raw_contribution: f64,
    ) {
        if !self.is_particle_type_admissible(particle.particle_type) {
            return;
        }
        debug_assert!(
            self.registry.is_assigned(entity),
            "tally {}: entity {entity} is not assigned",
            self.id
        );
        if !self.registry.is_assigned(entity) {
            return;
        }
        if !self.bins.is_point_in_phase_space(point) {
            return;
        }
        let Some(slot) = self.slot(ctx) else {
            return;
        };

        let mut tracker = lock(slot);
        for (i, response) in self.responses.iter().enumerate() {
            let Some(bin) = self.bins.calculate_bin_index(point, i) else {
                continue;
            };
            tracker.add(entity, bin, raw_contribution * response.evaluate(particle));
        }
    }

    /// Report one physical event in `entity`.
    ///
    /// Events this kind does not observe, and events in entities this tally
    /// does not score in, are ignored.
    pub fn update(
        &self,
        ctx: ThreadContext,
        entity: EntityId,
        particle: &ParticleState,
        event: TallyEvent,
    ) {
        if !self.registry.is_assigned(entity) {
            return;
        }

        if self.kind.is_pulse_height() {
            let sign = match event {
                TallyEvent::CellEntry => 1.0,
                TallyEvent::CellExit => -1.0,
                _ => return,
            };
            if !self.is_particle_type_admissible(particle.particle_type) {
                return;
            }
            if let Some(slot) = self.slot(ctx) {
                let weight = sign * particle.weight;
                lock(slot).deposit(
                    entity,
                    weight * particle.energy,
                    weight * particle.charge(),
                    particle,
                );
            }
            return;
        }

        let Some(raw) = self.kind.raw_contribution(&event, particle, &self.options) else {
            return;
        };
        let mut point = PhaseSpacePoint::from_particle(particle);
        if let TallyEvent::SurfaceCrossing { angle_cosine } = event {
            point = point.with_cosine(angle_cosine);
        }
        self.record(ctx, entity, particle, &point, raw);
    }

    pub fn on_collision(
        &self,
        ctx: ThreadContext,
        entity: EntityId,
        particle: &ParticleState,
        inverse_total_cross_section: f64,
    ) {
        self.update(
            ctx,
            entity,
            particle,
            TallyEvent::Collision {
                inverse_total_cross_section,
            },
        );
    }

    pub fn on_subtrack_end(
        &self,
        ctx: ThreadContext,
        entity: EntityId,
        particle: &ParticleState,
        track_length: f64,
    ) {
        self.update(ctx, entity, particle, TallyEvent::SubtrackEnd { track_length });
    }

    pub fn on_cell_entry(&self, ctx: ThreadContext, entity: EntityId, particle: &ParticleState) {
        self.update(ctx, entity, particle, TallyEvent::CellEntry);
    }

    pub fn on_cell_exit(&self, ctx: ThreadContext, entity: EntityId, particle: &ParticleState) {
        self.update(ctx, entity, particle, TallyEvent::CellExit);
    }

    pub fn on_surface_crossing(
        &self,
        ctx: ThreadContext,
        entity: EntityId,
        particle: &ParticleState,
        angle_cosine: f64,
    ) {
        self.update(ctx, entity, particle, TallyEvent::SurfaceCrossing { angle_cosine });
    }

    /// Score a track already split into `(element, length)` segments.
    /// Segments in elements this tally does not own are skipped.
    pub fn on_mesh_track(
        &self,
        ctx: ThreadContext,
        particle: &ParticleState,
        segments: &[(EntityId, f64)],
    ) {
        if !self.kind.is_mesh() {
            return;
        }
        for &(element, track_length) in segments {
            self.update(ctx, element, particle, TallyEvent::SubtrackEnd { track_length });
        }
    }

    /// Score the straight track `start -> end`, split by `mesh`.
    pub fn on_mesh_subtrack(
        &self,
        ctx: ThreadContext,
        particle: &ParticleState,
        start: [f64; 3],
        end: [f64; 3],
        mesh: &dyn MeshTrackSegmenter,
    ) {
        if !self.kind.is_mesh() {
            return;
        }
        self.on_mesh_track(ctx, particle, &mesh.segments(start, end));
    }

    /// Fold the calling thread's finished history into the shared moments.
    pub fn commit_history_contribution(&self, ctx: ThreadContext) {
        let Some(slot) = self.slot(ctx) else {
            return;
        };
        let history = {
            let mut tracker = lock(slot);
            if !tracker.has_uncommitted() {
                return;
            }
            if self.kind.is_pulse_height() {
                self.bin_depositions(&mut tracker);
            }
            tracker.take_contributions()
        };
        if !history.is_empty() {
            lock(&self.store).fold_history(&history);
        }
    }

    /// Turn each entity's whole-history deposition into one binned score.
    fn bin_depositions(&self, tracker: &mut UpdateTracker) {
        for (entity, deposition) in tracker.take_depositions() {
            let point = PhaseSpacePoint {
                source_energy: deposition.source_energy,
                source_time: deposition.source_time,
                source_id: deposition.source_id,
                ..PhaseSpacePoint::deposition(deposition.energy)
            };
            let Some(bin) = self.bins.phase_space_index(&point) else {
                continue;
            };
            let score = match self.options.contribution {
                ContributionMultiplier::Weight => 1.0,
                ContributionMultiplier::WeightAndEnergy => deposition.energy,
                ContributionMultiplier::WeightAndCharge => deposition.charge,
            };
            tracker.add(entity, bin, score);
        }
    }

    /// Abandon the calling thread's current history.
    pub fn discard_history_contribution(&self, ctx: ThreadContext) {
        if let Some(slot) = self.slot(ctx) {
            lock(slot).clear();
        }
    }

    pub fn has_uncommitted_history_contribution(&self, ctx: ThreadContext) -> bool {
        self.slots
            .get(ctx.id())
            .is_some_and(|slot| lock(slot).has_uncommitted())
    }

    /// Number of threads holding contributions not yet committed.
    pub fn uncommitted_thread_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|&slot| lock(slot).has_uncommitted())
            .count()
    }

    // -----------------------------------------------------------------------
    // Collective
    // -----------------------------------------------------------------------

    /// Sum every moment record onto `root` and zero the other ranks.
    ///
    /// Every rank must call this with the same tally layout. A no-op on a
    /// single rank. Score histograms are summed with the moments; moment
    /// snapshots stay local to each rank.
    ///
    /// A rank with uncommitted contributions still enters the collective,
    /// with a buffer no committed peer can match, so the whole group fails
    /// instead of waiting on it.
    pub fn reduce_data(&mut self, comm: &dyn Communicator, root: usize) -> Result<(), TallyError> {
        if comm.size() <= 1 {
            return self.ensure_committed();
        }
        let id = self.id;
        let reduction = |reason: String| TallyError::Reduction { tally: id, reason };

        if let Err(err) = self.ensure_committed() {
            let poisoned = vec![0.0; self.store_mut().flattened_len() + 1];
            if let Err(comm_err) = comm.reduce_sum(&poisoned, root) {
                log::warn!("tally {id}: {comm_err} while reducing with uncommitted histories");
            }
            return Err(err);
        }

        let flat = self.store_mut().flatten();
        let reduced = comm
            .reduce_sum(&flat, root)
            .map_err(|e| reduction(e.to_string()))?;

        let store = self.store_mut();
        match reduced {
            Some(values) => {
                if !store.load(&values) {
                    return Err(reduction(format!(
                        "reduced buffer has {} values, expected {}",
                        values.len(),
                        store.flattened_len()
                    )));
                }
            }
            None => store.reset(),
        }
        log::debug!(
            "tally {id}: reduced {} values onto rank {root} (rank {} of {})",
            flat.len(),
            comm.rank(),
            comm.size()
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Moment snapshots
    // -----------------------------------------------------------------------

    /// Record the current moments with the run statistics at this point.
    ///
    /// In a distributed run take snapshots on the root after each
    /// [`Tally::reduce_data`], when its moments cover every rank.
    pub fn take_snapshot(&mut self, run: &RunStatistics) -> Result<(), TallyError> {
        self.ensure_committed()?;
        let snapshot = MomentSnapshot::capture(&self.store(), run, self.snapshots_on_entity_bins);
        self.snapshots.push(snapshot);
        log::trace!(
            "tally {}: snapshot {} at {} histories",
            self.id,
            self.snapshots.len(),
            run.histories
        );
        Ok(())
    }

    pub fn moment_snapshots(&self) -> &[MomentSnapshot] {
        &self.snapshots
    }

    /// Histories at each snapshot.
    pub fn snapshot_history_values(&self) -> Vec<u64> {
        self.snapshots.iter().map(|s| s.histories).collect()
    }

    pub fn snapshot_sampling_times(&self) -> Vec<std::time::Duration> {
        self.snapshots.iter().map(|s| s.elapsed).collect()
    }

    /// Estimate of one entity bin at every snapshot. Empty unless snapshots
    /// on entity bins were enabled before the snapshots were taken.
    pub fn entity_bin_snapshot_estimates(
        &self,
        entity: EntityId,
        bin: usize,
    ) -> Result<Vec<(RunStatistics, BinEstimate)>, TallyError> {
        let normalization = self.check_entity(entity)?;
        Ok(self
            .snapshots
            .iter()
            .filter_map(|s| {
                let record = s.entity(entity)?.bins.get(bin)?;
                let run = s.run();
                Some((run, statistics::process_bin(record, &run, normalization, self.multiplier())))
            })
            .collect())
    }

    pub fn entity_total_snapshot_estimates(
        &self,
        entity: EntityId,
        response_index: usize,
    ) -> Result<Vec<(RunStatistics, TotalEstimate)>, TallyError> {
        let normalization = self.check_entity(entity)?;
        Ok(self
            .snapshots
            .iter()
            .filter_map(|s| {
                let record = s.entity(entity)?.totals.get(response_index)?;
                let run = s.run();
                Some((run, statistics::process_total(record, &run, normalization, self.multiplier())))
            })
            .collect())
    }

    pub fn total_bin_snapshot_estimates(&self, bin: usize) -> Vec<(RunStatistics, BinEstimate)> {
        let normalization = self.total_normalization_constant();
        self.snapshots
            .iter()
            .filter_map(|s| {
                let record = s.total_bins.get(bin)?;
                let run = s.run();
                Some((run, statistics::process_bin(record, &run, normalization, self.multiplier())))
            })
            .collect()
    }

    /// Global-total estimate of one response function at every snapshot.
    pub fn total_snapshot_estimates(
        &self,
        response_index: usize,
    ) -> Vec<(RunStatistics, TotalEstimate)> {
        let normalization = self.total_normalization_constant();
        self.snapshots
            .iter()
            .filter_map(|s| {
                let record = s.totals.get(response_index)?;
                let run = s.run();
                Some((run, statistics::process_total(record, &run, normalization, self.multiplier())))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Score histograms
    // -----------------------------------------------------------------------

    /// Empty unless histograms on entity bins are enabled.
    pub fn entity_bin_histograms(&self, entity: EntityId) -> Result<Vec<ScoreHistogram>, TallyError> {
        self.check_entity(entity)?;
        Ok(self
            .store()
            .entity(entity)
            .map(|m| m.bin_histograms.clone())
            .unwrap_or_default())
    }

    pub fn entity_total_histograms(
        &self,
        entity: EntityId,
    ) -> Result<Vec<ScoreHistogram>, TallyError> {
        self.check_entity(entity)?;
        Ok(self
            .store()
            .entity(entity)
            .map(|m| m.total_histograms.clone())
            .unwrap_or_default())
    }

    pub fn total_bin_histograms(&self) -> Vec<ScoreHistogram> {
        self.store().total_bin_histograms().to_vec()
    }

    pub fn total_histograms(&self) -> Vec<ScoreHistogram> {
        self.store().total_histograms().to_vec()
    }

    // -----------------------------------------------------------------------
    // Raw and processed data
    // -----------------------------------------------------------------------

    fn check_entity(&self, entity: EntityId) -> Result<f64, TallyError> {
        self.registry.normalization_constant(entity)
    }

    pub fn entity_bin_moments(&self, entity: EntityId) -> Result<Vec<MomentRecord>, TallyError> {
        self.check_entity(entity)?;
        Ok(self
            .store()
            .entity(entity)
            .map(|m| m.bins.clone())
            .unwrap_or_default())
    }

    pub fn entity_total_moments(&self, entity: EntityId) -> Result<Vec<MomentRecord>, TallyError> {
        self.check_entity(entity)?;
        Ok(self
            .store()
            .entity(entity)
            .map(|m| m.totals.clone())
            .unwrap_or_default())
    }

    pub fn total_bin_moments(&self) -> Vec<MomentRecord> {
        self.store().total_bins().to_vec()
    }

    pub fn total_moments(&self) -> Vec<MomentRecord> {
        self.store().totals().to_vec()
    }

    pub fn entity_bin_estimates(
        &self,
        entity: EntityId,
        run: &RunStatistics,
    ) -> Result<Vec<BinEstimate>, TallyError> {
        let normalization = self.check_entity(entity)?;
        Ok(self
            .entity_bin_moments(entity)?
            .iter()
            .map(|r| statistics::process_bin(r, run, normalization, self.multiplier()))
            .collect())
    }

    pub fn entity_total_estimates(
        &self,
        entity: EntityId,
        run: &RunStatistics,
    ) -> Result<Vec<TotalEstimate>, TallyError> {
        let normalization = self.check_entity(entity)?;
        Ok(self
            .entity_total_moments(entity)?
            .iter()
            .map(|r| statistics::process_total(r, run, normalization, self.multiplier()))
            .collect())
    }

    /// Per-bin estimates over all entities, normalized by the total constant.
    pub fn total_bin_estimates(&self, run: &RunStatistics) -> Vec<BinEstimate> {
        let normalization = self.total_normalization_constant();
        self.total_bin_moments()
            .iter()
            .map(|r| statistics::process_bin(r, run, normalization, self.multiplier()))
            .collect()
    }

    pub fn total_estimates(&self, run: &RunStatistics) -> Vec<TotalEstimate> {
        let normalization = self.total_normalization_constant();
        self.total_moments()
            .iter()
            .map(|r| statistics::process_total(r, run, normalization, self.multiplier()))
            .collect()
    }
}

impl std::fmt::Debug for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tally")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entities", &self.registry.len())
            .field("bins", &self.number_of_bins())
            .field("responses", &self.response_names())
            .field("particle_types", &self.particle_types)
            .field("thread_slots", &self.slots.len())
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}
