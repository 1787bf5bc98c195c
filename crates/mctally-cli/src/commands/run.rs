use std::error::Error;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::ValueEnum;
use mctally_core::{
    AxialMesh, Communicator, FnResponse, LocalCommunicator, ParticleState, ParticleType,
    PhaseSpaceDimension, RunStatistics, SharedResponse, Tally, TallyError, TallyKind,
    TallySnapshot, ThreadContext, UnitResponse,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::slab::SlabProblem;

const ROOT: usize = 0;
const MESH_ELEMENTS_PER_CELL: usize = 2;
/// Log-spaced score histogram for the watched tally's totals.
const HISTOGRAM_DECADES: std::ops::RangeInclusive<i32> = -6..=2;
const HISTOGRAM_BINS_PER_DECADE: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    All,
    CellCollisionFlux,
    CellTrackLengthFlux,
    CellPulseHeight,
    SurfaceFlux,
    SurfaceCurrent,
    MeshTrackLengthFlux,
}

impl KindArg {
    pub fn kinds(self) -> Vec<TallyKind> {
        match self {
            Self::All => TallyKind::ALL.to_vec(),
            Self::CellCollisionFlux => vec![TallyKind::CellCollisionFlux],
            Self::CellTrackLengthFlux => vec![TallyKind::CellTrackLengthFlux],
            Self::CellPulseHeight => vec![TallyKind::CellPulseHeight],
            Self::SurfaceFlux => vec![TallyKind::SurfaceFlux],
            Self::SurfaceCurrent => vec![TallyKind::SurfaceCurrent],
            Self::MeshTrackLengthFlux => vec![TallyKind::MeshTrackLengthFlux],
        }
    }
}

pub struct RunCommandConfig {
    pub histories: u64,
    pub threads: usize,
    pub ranks: usize,
    pub kinds: Vec<TallyKind>,
    pub seed: u64,
    pub checkpoints: usize,
    pub json: bool,
}

impl RunCommandConfig {
    fn validate(&self) -> Result<(), String> {
        if self.threads == 0 {
            return Err("--threads must be at least 1".into());
        }
        if self.ranks == 0 {
            return Err("--ranks must be at least 1".into());
        }
        if self.checkpoints == 0 {
            return Err("--checkpoints must be at least 1".into());
        }
        if self.histories < self.checkpoints as u64 {
            return Err(format!(
                "--histories ({}) must be at least --checkpoints ({})",
                self.histories, self.checkpoints
            ));
        }
        Ok(())
    }

    /// Global history indices `[begin, end)` of one checkpoint interval.
    fn interval(&self, index: usize) -> Range<u64> {
        let n = self.checkpoints as u64;
        let begin = self.histories * index as u64 / n;
        let end = self.histories * (index as u64 + 1) / n;
        begin..end
    }
}

struct RankOutcome {
    tallies: Vec<Tally>,
}

pub fn run(config: &RunCommandConfig) -> Result<(), Box<dyn Error>> {
    config.validate()?;

    let problem = SlabProblem::default();
    let mesh = problem
        .mesh(MESH_ELEMENTS_PER_CELL)
        .ok_or("slab problem produced an empty mesh")?;

    log::info!(
        "{} histories on {} rank(s) x {} thread(s), seed {:#x}",
        config.histories,
        config.ranks,
        config.threads,
        config.seed
    );

    let group = LocalCommunicator::group(config.ranks);
    let start = Instant::now();
    let outcomes: Vec<Result<RankOutcome, TallyError>> = thread::scope(|s| {
        let handles: Vec<_> = group
            .iter()
            .map(|comm| {
                let (problem, mesh) = (&problem, &mesh);
                s.spawn(move || run_rank(config, problem, mesh, comm, start))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });
    let elapsed = start.elapsed();

    let mut outcomes = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
    let root = outcomes.swap_remove(ROOT);
    let run = RunStatistics::new(config.histories, elapsed);

    if config.json {
        let snapshots: Vec<TallySnapshot> = root.tallies.iter().map(Tally::snapshot).collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    println!(
        "Slab problem: {} cells x {} cm, sigma_t {} /cm, absorption {}, {} MeV photons",
        problem.cells,
        problem.thickness,
        problem.total_cross_section,
        problem.absorption_probability,
        problem.source_energy
    );
    println!(
        "{} histories | {} rank(s) x {} thread(s) | {:.2}s\n",
        config.histories,
        config.ranks,
        config.threads,
        elapsed.as_secs_f64()
    );
    for tally in &root.tallies {
        println!("{}", tally.summary(&run));
    }

    let Some(watched) = watched_tally(&root.tallies) else {
        return Ok(());
    };
    println!(
        "Statistical checks on tally {} ({}), {} snapshots:",
        watched.id(),
        watched.kind(),
        watched.moment_snapshots().len()
    );
    let results = mctally_tests::run_tally_checks(watched, 0);
    mctally_tests::print_checks(&results);
    let passed = results.iter().filter(|r| r.passed).count();
    println!(
        "\nQuality score: {:.0}/100 ({}/{} passed)",
        mctally_tests::calculate_quality_score(&results),
        passed,
        results.len()
    );
    if let Some(total) = watched.total_estimates(&run).first() {
        if let Some((lo, hi)) =
            mctally_tests::confidence_interval(total.mean, total.relative_error, 0.95)
        {
            println!("95% interval on the total: [{lo:.5e}, {hi:.5e}]");
        }
    }
    Ok(())
}

/// The checks follow the track-length tally when it is selected.
fn watched_tally(tallies: &[Tally]) -> Option<&Tally> {
    tallies
        .iter()
        .find(|t| t.kind() == TallyKind::CellTrackLengthFlux)
        .or_else(|| tallies.first())
}

fn run_rank(
    config: &RunCommandConfig,
    problem: &SlabProblem,
    mesh: &AxialMesh,
    comm: &LocalCommunicator,
    start: Instant,
) -> Result<RankOutcome, TallyError> {
    let mut tallies = build_tallies(config, problem, mesh)?;

    for index in 0..config.checkpoints {
        let interval = config.interval(index);
        let done = interval.end;
        run_interval(config, problem, mesh, &tallies, comm.rank(), interval);

        // Non-root ranks are zeroed by the reduction, so the root always
        // holds the cumulative sum over every rank.
        for tally in &mut tallies {
            tally.reduce_data(comm, ROOT)?;
        }

        if comm.rank() == ROOT {
            let run = RunStatistics::new(done, start.elapsed());
            for tally in &mut tallies {
                tally.take_snapshot(&run)?;
            }
            let total = watched_tally(&tallies).and_then(|t| t.total_estimates(&run).first().copied());
            if let Some(total) = total {
                log::debug!(
                    "snapshot {}: {} histories, mean {:.5e}, RE {:.4}, VOV {:.4}",
                    index + 1,
                    done,
                    total.mean,
                    total.relative_error,
                    total.variance_of_variance
                );
            }
        }
    }

    Ok(RankOutcome { tallies })
}

/// Run this rank's share of `interval`, split over the worker threads.
fn run_interval(
    config: &RunCommandConfig,
    problem: &SlabProblem,
    mesh: &AxialMesh,
    tallies: &[Tally],
    rank: usize,
    interval: Range<u64>,
) {
    let ranks = config.ranks as u64;
    thread::scope(|s| {
        for worker in 0..config.threads {
            let interval = interval.clone();
            s.spawn(move || {
                let ctx = ThreadContext::new(worker);
                let histories = interval
                    .filter(|h| h % ranks == rank as u64)
                    .skip(worker)
                    .step_by(config.threads);
                for history in histories {
                    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(history));
                    problem.run_history(&mut rng, ctx, tallies, mesh);
                }
            });
        }
    });
}

fn build_tallies(
    config: &RunCommandConfig,
    problem: &SlabProblem,
    mesh: &AxialMesh,
) -> Result<Vec<Tally>, TallyError> {
    TallyKind::ALL
        .into_iter()
        .zip(1..)
        .filter(|(kind, _)| config.kinds.contains(kind))
        .map(|(kind, id)| build_tally(id, kind, config.threads, problem, mesh))
        .collect()
}

fn build_tally(
    id: u32,
    kind: TallyKind,
    threads: usize,
    problem: &SlabProblem,
    mesh: &AxialMesh,
) -> Result<Tally, TallyError> {
    let entities = if kind.is_surface() {
        problem.surface_entities()
    } else if kind.is_mesh() {
        mesh.elements().zip(mesh.thicknesses()).collect()
    } else {
        problem.cell_entities()
    };

    let mut tally = Tally::new(id, kind, &entities)?;
    tally.set_particle_types(&[ParticleType::Photon])?;

    match kind {
        TallyKind::CellCollisionFlux => {
            tally.set_bin_boundaries(PhaseSpaceDimension::CollisionNumber, &[0.0, 1.0, 2.0, 10.0])?;
        }
        TallyKind::CellTrackLengthFlux => {
            tally.set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 0.1, 0.25, 0.5, 1.0])?;
            tally.set_response_functions(vec![
                Arc::new(UnitResponse) as SharedResponse,
                FnResponse::new("energy", |p: &ParticleState| p.energy).shared(),
            ])?;
            tally.set_sample_moment_histogram_bins(&log_boundaries())?;
        }
        TallyKind::CellPulseHeight => {
            tally.set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 0.01, 0.1, 0.5, 1.0])?;
            tally.set_bin_boundaries(PhaseSpaceDimension::SourceEnergy, &[0.0, problem.source_energy])?;
        }
        TallyKind::SurfaceFlux => {
            tally.set_bin_boundaries(PhaseSpaceDimension::Cosine, &[-1.0, -0.5, 0.0, 0.5, 1.0])?;
        }
        TallyKind::SurfaceCurrent => {
            tally.set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 0.25, 0.5, 1.0])?;
            tally.set_bin_boundaries(PhaseSpaceDimension::Cosine, &[-1.0, 0.0, 1.0])?;
        }
        TallyKind::MeshTrackLengthFlux => {
            tally.set_bin_boundaries(PhaseSpaceDimension::Time, &[0.0, 0.02, 0.05, 0.1, 1.0])?;
        }
    }

    tally.enable_thread_support(threads)?;
    Ok(tally)
}

fn log_boundaries() -> Vec<f64> {
    let (first, last) = (*HISTOGRAM_DECADES.start(), *HISTOGRAM_DECADES.end());
    (first * HISTOGRAM_BINS_PER_DECADE..=last * HISTOGRAM_BINS_PER_DECADE)
        .map(|k| 10f64.powf(f64::from(k) / f64::from(HISTOGRAM_BINS_PER_DECADE)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threads: usize, ranks: usize) -> RunCommandConfig {
        RunCommandConfig {
            histories: 400,
            threads,
            ranks,
            kinds: TallyKind::ALL.to_vec(),
            seed: 7,
            checkpoints: 4,
            json: false,
        }
    }

    fn run_group(config: &RunCommandConfig) -> RankOutcome {
        let problem = SlabProblem::default();
        let mesh = problem.mesh(MESH_ELEMENTS_PER_CELL).unwrap();
        let group = LocalCommunicator::group(config.ranks);
        let start = Instant::now();
        let mut outcomes: Vec<RankOutcome> = thread::scope(|s| {
            let handles: Vec<_> = group
                .iter()
                .map(|comm| {
                    let (problem, mesh) = (&problem, &mesh);
                    s.spawn(move || run_rank(config, problem, mesh, comm, start).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        outcomes.swap_remove(ROOT)
    }

    fn first_moments(tallies: &[Tally]) -> Vec<Vec<f64>> {
        tallies
            .iter()
            .map(|t| t.total_bin_moments().iter().map(|r| r.m1).collect())
            .collect()
    }

    #[test]
    fn intervals_cover_every_history_once() {
        let config = config(1, 1);
        let covered: Vec<u64> = (0..config.checkpoints)
            .flat_map(|i| config.interval(i))
            .collect();
        assert_eq!(covered, (0..config.histories).collect::<Vec<_>>());
    }

    #[test]
    fn validation() {
        assert!(config(0, 1).validate().is_err());
        assert!(config(1, 0).validate().is_err());
        let mut c = config(1, 1);
        c.histories = 2;
        assert!(c.validate().is_err());
        assert!(config(2, 2).validate().is_ok());
    }

    #[test]
    fn one_tally_per_selected_kind() {
        let problem = SlabProblem::default();
        let mesh = problem.mesh(MESH_ELEMENTS_PER_CELL).unwrap();
        let tallies = build_tallies(&config(1, 1), &problem, &mesh).unwrap();
        let kinds: Vec<TallyKind> = tallies.iter().map(Tally::kind).collect();
        assert_eq!(kinds, TallyKind::ALL.to_vec());
        assert_eq!(tallies[1].number_of_response_functions(), 2);
        assert_eq!(tallies[5].entity_ids().len(), 6);

        let mut only = config(1, 1);
        only.kinds = KindArg::SurfaceFlux.kinds();
        let tallies = build_tallies(&only, &problem, &mesh).unwrap();
        assert_eq!(tallies.len(), 1);
        assert_eq!(tallies[0].id(), 4);
    }

    #[test]
    fn root_snapshots_are_cumulative() {
        let outcome = run_group(&config(2, 2));
        for tally in &outcome.tallies {
            assert_eq!(tally.snapshot_history_values(), vec![100, 200, 300, 400]);
        }
        let watched = watched_tally(&outcome.tallies).unwrap();
        let series = mctally_tests::Checkpoint::series_from_snapshots(watched, 0);
        assert_eq!(series.len(), 4);
        assert_eq!(watched.total_histograms()[0].len(), 40);
        let results = mctally_tests::run_tally_checks(watched, 0);
        assert_eq!(results.len(), 8);
    }

    #[test]
    fn log_boundaries_ascend() {
        let b = log_boundaries();
        assert_eq!(b.len(), 41);
        assert!(b.windows(2).all(|w| w[0] < w[1]));
        assert!((b[0] - 1e-6).abs() < 1e-18);
        assert!((b[40] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn results_match_across_threads_and_ranks() {
        // Track scores are not exact binary fractions, so compare with a
        // tolerance that only summation order can explain.
        let serial = first_moments(&run_group(&config(1, 1)).tallies);
        let spread = first_moments(&run_group(&config(3, 2)).tallies);
        for (a, b) in serial.iter().flatten().zip(spread.iter().flatten()) {
            assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{a} vs {b}");
        }
    }
}
