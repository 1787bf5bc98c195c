//! # mctally-core
//!
//! Statistical tally engine for Monte Carlo particle transport.
//!
//! The transport code reports physical events (collisions, track segments,
//! surface crossings, cell entries and exits); a [`Tally`] turns them into
//! per-history scores, bins them over phase space and response functions,
//! and folds each finished history into running first-through-fourth
//! moments. Means, relative errors, variance of the variance and figures of
//! merit are derived from those moments on demand.
//!
//! ## Quick Start
//!
//! ```
//! use mctally_core::{
//!     EntityId, ParticleState, ParticleType, PhaseSpaceDimension, RunStatistics, Tally,
//!     TallyKind, ThreadContext,
//! };
//!
//! let mut tally = Tally::new(1, TallyKind::CellTrackLengthFlux, &[(EntityId(1), 2.0)])?;
//! tally.set_particle_types(&[ParticleType::Neutron])?;
//! tally.set_bin_boundaries(PhaseSpaceDimension::Energy, &[0.0, 1.0, 20.0])?;
//!
//! let ctx = ThreadContext::MAIN;
//! let neutron = ParticleState::new(ParticleType::Neutron).with_energy(2.0);
//! tally.on_subtrack_end(ctx, EntityId(1), &neutron, 0.5);
//! tally.commit_history_contribution(ctx);
//!
//! let run = RunStatistics::new(1, std::time::Duration::from_secs(1));
//! let bins = tally.entity_bin_estimates(EntityId(1), &run)?;
//! assert_eq!(bins[1].mean, 0.25);
//! # Ok::<(), mctally_core::TallyError>(())
//! ```
//!
//! ## Concurrency
//!
//! Each worker thread runs whole histories and owns one tracker slot,
//! selected by the [`ThreadContext`] it passes in. Contributions within a
//! history touch only that slot; the commit is the only step that takes the
//! shared lock. Results do not depend on how histories interleave.
//!
//! ## Distributed runs
//!
//! [`Tally::reduce_data`] sums every moment onto a root rank through a
//! [`Communicator`] and zeroes the others.
//!
//! ## Convergence data
//!
//! [`Tally::take_snapshot`] records the moments at chosen points of a run so
//! that the estimates can be followed as histories accumulate, and
//! [`Tally::set_sample_moment_histogram_bins`] keeps a histogram of every
//! committed score for tail analysis.

pub mod config;
pub mod error;
pub mod histogram;
pub mod history;
pub mod kinds;
pub mod mesh;
pub mod moments;
pub mod particle;
pub mod phase_space;
pub mod reduce;
pub mod registry;
pub mod response;
pub mod snapshot;
pub mod statistics;
pub mod tally;
pub mod tracker;

pub use config::TallyOptions;
pub use error::{TallyError, TallyId};
pub use histogram::ScoreHistogram;
pub use history::{EntityMomentSnapshot, MomentSnapshot};
pub use kinds::{TallyEvent, TallyKind};
pub use mesh::{AxialMesh, MeshTrackSegmenter};
pub use moments::{EntityMoments, HistogramLayout, MomentRecord, MomentStore};
pub use particle::{ContributionMultiplier, ParticleState, ParticleType};
pub use phase_space::{PhaseSpaceBinSet, PhaseSpaceDimension, PhaseSpacePoint};
pub use reduce::{CommError, Communicator, LocalCommunicator, SerialCommunicator};
pub use registry::{EntityId, EntityRegistry};
pub use response::{FnResponse, ResponseFunction, SharedResponse, UnitResponse};
pub use snapshot::{DimensionSnapshot, EntitySnapshot, TallySnapshot};
pub use statistics::{BinEstimate, RunStatistics, TotalEstimate};
pub use tally::Tally;
pub use tracker::{ThreadContext, UpdateTracker};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
