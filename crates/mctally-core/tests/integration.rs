//! Integration tests for mctally-core.
//!
//! These drive whole histories through the public API:
//! configuration → concurrent contributions and commits → statistics →
//! snapshots and histograms → reduction across ranks.

use std::time::Duration;

use mctally_core::{
    Communicator, EntityId, LocalCommunicator, MomentRecord, ParticleState, ParticleType, PhaseSpaceDimension,
    RunStatistics, SerialCommunicator, Tally, TallyError, TallyKind, ThreadContext,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One scored event: entity, particle energy, raw contribution.
type Event = (u64, f64, f64);

fn photon(energy: f64) -> ParticleState {
    ParticleState::new(ParticleType::Photon).with_energy(energy)
}

fn binned_tally(threads: usize) -> Tally {
    let entities = [(EntityId(1), 1.0), (EntityId(2), 2.0), (EntityId(3), 0.5)];
    let mut tally = Tally::new(1, TallyKind::CellCollisionFlux, &entities).unwrap();
    tally.set_particle_types(&[ParticleType::Photon]).unwrap();
    tally
        .set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 1.0, 2.0, 5.0, 10.0])
        .unwrap();
    tally.enable_thread_support(threads).unwrap();
    tally
}

/// Random histories whose scores are exact binary fractions, so sums do not
/// depend on the order they are added in.
fn random_histories(seed: u64, n: usize) -> Vec<Vec<Event>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let events = rng.random_range(0..6);
            (0..events)
                .map(|_| {
                    let entity = rng.random_range(1..=3);
                    // a few land above 10 MeV, outside the bins
                    let energy = rng.random_range(0..24) as f64 * 0.5;
                    let score = rng.random_range(1..8) as f64 * 0.25;
                    (entity, energy, score)
                })
                .collect()
        })
        .collect()
}

fn run_history(tally: &Tally, ctx: ThreadContext, history: &[Event]) {
    for &(entity, energy, score) in history {
        tally.on_collision(ctx, EntityId(entity), &photon(energy), score);
    }
    tally.commit_history_contribution(ctx);
}

fn all_records(tally: &Tally) -> Vec<MomentRecord> {
    let snap = tally.snapshot();
    snap.entities
        .into_iter()
        .flat_map(|e| e.bins.into_iter().chain(e.totals))
        .chain(snap.total_bins)
        .chain(snap.totals)
        .collect()
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn two_threads_commit_into_the_same_bin() {
    let mut tally = Tally::new(1, TallyKind::CellCollisionFlux, &[(EntityId(1), 1.0)]).unwrap();
    tally.set_particle_types(&[ParticleType::Photon]).unwrap();
    tally.enable_thread_support(2).unwrap();

    std::thread::scope(|s| {
        for id in 0..2 {
            let tally = &tally;
            s.spawn(move || {
                let ctx = ThreadContext::new(id);
                tally.on_collision(ctx, EntityId(1), &photon(1.0), 1.0);
                tally.commit_history_contribution(ctx);
            });
        }
    });

    assert_eq!(tally.entity_bin_moments(EntityId(1)).unwrap()[0].m1, 2.0);
    assert_eq!(tally.total_moments()[0].m1, 2.0);
    assert_eq!(tally.uncommitted_thread_count(), 0);
}

#[test]
fn results_do_not_depend_on_interleaving() {
    let histories = random_histories(42, 2_000);

    let serial = binned_tally(1);
    for h in &histories {
        run_history(&serial, ThreadContext::MAIN, h);
    }

    let threads = 4;
    let parallel = binned_tally(threads);
    std::thread::scope(|s| {
        for id in 0..threads {
            let tally = &parallel;
            let histories = &histories;
            s.spawn(move || {
                let ctx = ThreadContext::new(id);
                for h in histories.iter().skip(id).step_by(threads) {
                    run_history(tally, ctx, h);
                }
            });
        }
    });

    let reversed = binned_tally(1);
    for h in histories.iter().rev() {
        run_history(&reversed, ThreadContext::MAIN, h);
    }

    assert_eq!(all_records(&serial), all_records(&parallel));
    assert_eq!(all_records(&serial), all_records(&reversed));
}

#[test]
fn uncommitted_history_stays_private_to_its_thread() {
    let tally = binned_tally(2);
    let a = ThreadContext::new(0);
    let b = ThreadContext::new(1);

    tally.on_collision(a, EntityId(1), &photon(0.5), 3.0);
    tally.on_collision(b, EntityId(1), &photon(0.5), 5.0);
    tally.commit_history_contribution(b);

    assert_eq!(tally.entity_bin_moments(EntityId(1)).unwrap()[0].m1, 5.0);
    assert!(tally.has_uncommitted_history_contribution(a));
    tally.discard_history_contribution(a);
    assert_eq!(tally.uncommitted_thread_count(), 0);
    assert_eq!(tally.entity_bin_moments(EntityId(1)).unwrap()[0].m1, 5.0);
}

// ---------------------------------------------------------------------------
// Conservation and reset
// ---------------------------------------------------------------------------

#[test]
fn bins_sum_to_entity_totals_and_entity_totals_to_global() {
    let tally = binned_tally(1);
    for h in random_histories(7, 500) {
        run_history(&tally, ThreadContext::MAIN, &h);
    }

    let mut entity_sum = 0.0;
    for &entity in tally.entity_ids() {
        let bins: f64 = tally
            .entity_bin_moments(entity)
            .unwrap()
            .iter()
            .map(|r| r.m1)
            .sum();
        let total = tally.entity_total_moments(entity).unwrap()[0].m1;
        assert_eq!(bins, total, "entity {entity}");
        entity_sum += total;
    }
    let global = tally.total_moments()[0].m1;
    assert_eq!(entity_sum, global);

    let total_bins: f64 = tally.total_bin_moments().iter().map(|r| r.m1).sum();
    assert_eq!(total_bins, global);
}

#[test]
fn reset_then_replay_matches_a_fresh_run() {
    let histories = random_histories(3, 300);

    let fresh = binned_tally(1);
    for h in &histories {
        run_history(&fresh, ThreadContext::MAIN, h);
    }

    let mut reused = binned_tally(1);
    for h in random_histories(99, 100) {
        run_history(&reused, ThreadContext::MAIN, &h);
    }
    reused.reset_data().unwrap();
    for h in &histories {
        run_history(&reused, ThreadContext::MAIN, h);
    }

    assert_eq!(all_records(&fresh), all_records(&reused));
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[test]
fn mean_matches_sample_average() {
    let mut tally = Tally::new(2, TallyKind::CellTrackLengthFlux, &[(EntityId(1), 2.0)]).unwrap();
    tally.set_particle_types(&[ParticleType::Photon]).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let scores: Vec<f64> = (0..1_000).map(|_| rng.random::<f64>()).collect();
    for &len in &scores {
        tally.on_subtrack_end(ThreadContext::MAIN, EntityId(1), &photon(1.0), len);
        tally.commit_history_contribution(ThreadContext::MAIN);
    }

    let run = RunStatistics::new(scores.len() as u64, Duration::from_secs(2));
    let est = tally.entity_total_estimates(EntityId(1), &run).unwrap()[0];
    let expected = scores.iter().sum::<f64>() / (scores.len() as f64 * 2.0);
    assert!((est.mean - expected).abs() < 1e-12);
    // uniform(0,1): RE ≈ sqrt(1/12) / 0.5 / sqrt(N) ≈ 0.018
    assert!(est.relative_error > 0.01 && est.relative_error < 0.03);
    assert!(est.figure_of_merit > 0.0);
    assert!(est.variance_of_variance > 0.0 && est.variance_of_variance < 0.01);
}

// ---------------------------------------------------------------------------
// Snapshots and histograms
// ---------------------------------------------------------------------------

#[test]
fn snapshots_hold_the_moments_at_each_point() {
    let mut tally = binned_tally(1);
    tally.enable_snapshots_on_entity_bins();
    let histories = random_histories(21, 200);

    let mut expected = Vec::new();
    for (chunk, secs) in histories.chunks(100).zip([3, 7]) {
        for history in chunk {
            run_history(&tally, ThreadContext::MAIN, history);
        }
        let done = expected.len() as u64 * 100 + 100;
        let run = RunStatistics::new(done, Duration::from_secs(secs));
        tally.take_snapshot(&run).unwrap();
        expected.push((run, all_records(&tally), tally.total_estimates(&run)[0]));
    }

    assert_eq!(tally.snapshot_history_values(), vec![100, 200]);
    assert_eq!(
        tally.snapshot_sampling_times(),
        vec![Duration::from_secs(3), Duration::from_secs(7)]
    );
    for (snap, (run, records, total)) in tally.moment_snapshots().iter().zip(&expected) {
        assert_eq!(snap.run(), *run);
        let captured: Vec<MomentRecord> = snap
            .entities
            .iter()
            .flat_map(|e| e.bins.iter().chain(&e.totals).copied())
            .chain(snap.total_bins.iter().copied())
            .chain(snap.totals.iter().copied())
            .collect();
        assert_eq!(&captured, records);
        assert_ne!(total.mean, 0.0);
    }

    let series = tally.total_snapshot_estimates(0);
    assert_eq!(series.len(), 2);
    for ((run, estimate), (expected_run, _, expected_total)) in series.iter().zip(&expected) {
        assert_eq!(run, expected_run);
        assert_eq!(estimate, expected_total);
    }
    let bin_series = tally.entity_bin_snapshot_estimates(EntityId(2), 1).unwrap();
    assert_eq!(bin_series.len(), 2);
    assert_eq!(tally.total_bin_snapshot_estimates(1).len(), 2);
    assert_eq!(tally.entity_total_snapshot_estimates(EntityId(3), 0).unwrap().len(), 2);

    tally.reset_data().unwrap();
    assert!(tally.moment_snapshots().is_empty());
}

#[test]
fn score_histograms_count_committed_history_scores() {
    let mut tally = binned_tally(1);
    tally.set_sample_moment_histogram_bins(&[0.0, 1.0, 100.0]).unwrap();
    let histories = random_histories(5, 300);
    for history in &histories {
        run_history(&tally, ThreadContext::MAIN, history);
    }

    // every history with an in-range score lands in the global total histogram
    let scored = histories
        .iter()
        .filter(|h| h.iter().any(|&(_, energy, _)| energy <= 10.0))
        .count() as u64;
    let totals = tally.total_histograms();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].number_of_scores(), scored);
    assert!(tally.entity_bin_histograms(EntityId(1)).unwrap().is_empty());
    assert_eq!(tally.entity_total_histograms(EntityId(1)).unwrap().len(), 1);
    assert_eq!(tally.total_bin_histograms().len(), 4);

    assert!(matches!(
        tally.set_sample_moment_histogram_bins(&[1.0]),
        Err(TallyError::InvalidHistogramBoundaries { tally: 1, .. })
    ));
}

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

#[test]
fn reduce_sums_onto_root_and_zeroes_the_rest() {
    let group = LocalCommunicator::group(2);
    let scores = [5.0, 7.0];

    let tallies: Vec<Tally> = std::thread::scope(|s| {
        let handles: Vec<_> = group
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let mut tally =
                        Tally::new(9, TallyKind::SurfaceCurrent, &[(EntityId(1), 1.0)]).unwrap();
                    tally.set_particle_types(&[ParticleType::Photon]).unwrap();
                    let ctx = ThreadContext::MAIN;
                    let particle = photon(1.0).with_weight(scores[comm.rank()]);
                    tally.on_surface_crossing(ctx, EntityId(1), &particle, 0.5);
                    tally.commit_history_contribution(ctx);
                    tally.reduce_data(comm, 0).unwrap();
                    tally
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let root = tallies[0].entity_bin_moments(EntityId(1)).unwrap()[0];
    assert_eq!(root.m1, 12.0);
    assert_eq!(root.m2, 25.0 + 49.0);
    assert_eq!(tallies[0].total_moments()[0].m1, 12.0);

    assert!(all_records(&tallies[1]).iter().all(MomentRecord::is_zero));
}

#[test]
fn reduce_refuses_uncommitted_data() {
    let mut tally = binned_tally(1);
    tally.on_collision(ThreadContext::MAIN, EntityId(1), &photon(1.0), 1.0);
    assert!(matches!(
        tally.reduce_data(&SerialCommunicator, 0),
        Err(TallyError::UncommittedContributions { threads: 1, .. })
    ));
    tally.commit_history_contribution(ThreadContext::MAIN);
    let before = all_records(&tally);
    tally.reduce_data(&SerialCommunicator, 0).unwrap();
    assert_eq!(before, all_records(&tally));
}

#[test]
fn reduce_reports_layout_mismatch() {
    let group = LocalCommunicator::group(2);
    let results: Vec<Result<(), TallyError>> = std::thread::scope(|s| {
        let handles: Vec<_> = group
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let mut tally = binned_tally(1);
                    if comm.rank() == 1 {
                        tally
                            .set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 10.0])
                            .unwrap();
                    }
                    tally.reduce_data(comm, 0)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for r in results {
        assert!(matches!(r, Err(TallyError::Reduction { tally: 1, .. })));
    }
}

#[test]
fn reduce_with_an_uncommitted_rank_fails_everywhere() {
    let group = LocalCommunicator::group(3);
    let results: Vec<Result<(), TallyError>> = std::thread::scope(|s| {
        let handles: Vec<_> = group
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let mut tally = binned_tally(1);
                    run_history(&tally, ThreadContext::MAIN, &[(1, 1.5, 1.0)]);
                    if comm.rank() == 2 {
                        tally.on_collision(ThreadContext::MAIN, EntityId(1), &photon(1.0), 1.0);
                    }
                    tally.reduce_data(comm, 0)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(matches!(
        results[2],
        Err(TallyError::UncommittedContributions { tally: 1, threads: 1 })
    ));
    for r in &results[..2] {
        assert!(matches!(r, Err(TallyError::Reduction { tally: 1, .. })));
    }
}

#[test]
fn reduce_sums_score_histograms() {
    let group = LocalCommunicator::group(2);
    let tallies: Vec<Tally> = std::thread::scope(|s| {
        let handles: Vec<_> = group
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let mut tally = binned_tally(1);
                    tally.set_sample_moment_histogram_bins(&[0.0, 1.0, 10.0]).unwrap();
                    let score = if comm.rank() == 0 { 0.5 } else { 2.0 };
                    run_history(&tally, ThreadContext::MAIN, &[(1, 1.5, score)]);
                    tally.reduce_data(comm, 0).unwrap();
                    tally
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(tallies[0].total_histograms()[0].counts(), &[1, 1]);
    assert_eq!(tallies[1].total_histograms()[0].number_of_scores(), 0);
}
