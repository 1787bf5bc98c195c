//! Toy photon transport through a row of slabs along z.
//!
//! Cell `i` spans `[i * thickness, (i + 1) * thickness]` and is bounded by
//! surfaces `i` and `i + 1`. Photons are born at z = 0 heading into the
//! stack, fly exponential distances, scatter isotropically and lose a random
//! share of their energy at each collision, and are absorbed by roulette.
//! The geometry is unbounded in x and y.

use std::f64::consts::PI;

use mctally_core::{
    AxialMesh, EntityId, MeshTrackSegmenter, ParticleState, ParticleType, Tally, ThreadContext,
};
use rand::Rng;

pub const FIRST_CELL: u64 = 1;
pub const FIRST_SURFACE: u64 = 10;
pub const FIRST_MESH_ELEMENT: u64 = 100;

/// cm/ns
const SPEED_OF_LIGHT: f64 = 29.979_245_8;

#[derive(Debug, Clone)]
pub struct SlabProblem {
    pub cells: usize,
    /// cm
    pub thickness: f64,
    /// 1/cm
    pub total_cross_section: f64,
    pub absorption_probability: f64,
    /// MeV
    pub source_energy: f64,
}

impl Default for SlabProblem {
    fn default() -> Self {
        Self {
            cells: 3,
            thickness: 1.0,
            total_cross_section: 1.0,
            absorption_probability: 0.3,
            source_energy: 1.0,
        }
    }
}

impl SlabProblem {
    pub fn cell(&self, index: usize) -> EntityId {
        EntityId(FIRST_CELL + index as u64)
    }

    pub fn surface(&self, index: usize) -> EntityId {
        EntityId(FIRST_SURFACE + index as u64)
    }

    /// Cells with their volume per unit transverse area.
    pub fn cell_entities(&self) -> Vec<(EntityId, f64)> {
        (0..self.cells).map(|i| (self.cell(i), self.thickness)).collect()
    }

    /// Surfaces with unit area.
    pub fn surface_entities(&self) -> Vec<(EntityId, f64)> {
        (0..=self.cells).map(|i| (self.surface(i), 1.0)).collect()
    }

    /// A mesh splitting every cell into `per_cell` equal elements.
    pub fn mesh(&self, per_cell: usize) -> Option<AxialMesh> {
        let elements = self.cells * per_cell.max(1);
        let width = self.thickness / per_cell.max(1) as f64;
        let planes = (0..=elements).map(|i| i as f64 * width).collect();
        AxialMesh::new(planes, FIRST_MESH_ELEMENT)
    }

    /// Run one history and commit it on every tally.
    ///
    /// Every event goes to every tally; a tally ignores entities it does not
    /// own and events its kind does not observe.
    pub fn run_history<R: Rng>(
        &self,
        rng: &mut R,
        ctx: ThreadContext,
        tallies: &[Tally],
        mesh: &dyn MeshTrackSegmenter,
    ) {
        let mut photon = ParticleState::new(ParticleType::Photon)
            .with_energy(self.source_energy)
            .with_source(self.source_energy, 0.0, 0)
            .with_direction(forward_direction(rng));
        let mut cell = 0;

        for tally in tallies {
            tally.on_surface_crossing(ctx, self.surface(0), &photon, photon.direction[2]);
            tally.on_cell_entry(ctx, self.cell(0), &photon);
        }

        loop {
            let mu = photon.direction[2];
            let lower = cell as f64 * self.thickness;
            let upper = lower + self.thickness;
            let to_boundary = if mu > 0.0 {
                (upper - photon.position[2]) / mu
            } else if mu < 0.0 {
                (lower - photon.position[2]) / mu
            } else {
                f64::INFINITY
            };
            let to_collision = -(1.0 - rng.random::<f64>()).ln() / self.total_cross_section;

            let start = photon.position;
            let collides = to_collision < to_boundary;
            let distance = if collides { to_collision } else { to_boundary };
            advance(&mut photon, distance);
            if !collides {
                photon.position[2] = if mu > 0.0 { upper } else { lower };
            }

            for tally in tallies {
                tally.on_subtrack_end(ctx, self.cell(cell), &photon, distance);
                tally.on_mesh_subtrack(ctx, &photon, start, photon.position, mesh);
            }

            if collides {
                for tally in tallies {
                    tally.on_collision(
                        ctx,
                        self.cell(cell),
                        &photon,
                        1.0 / self.total_cross_section,
                    );
                }
                if rng.random::<f64>() < self.absorption_probability {
                    break;
                }
                photon.energy *= rng.random_range(0.5..1.0);
                photon.direction = isotropic_direction(rng);
                photon.collision_number += 1;
                continue;
            }

            let surface = if mu > 0.0 { cell + 1 } else { cell };
            for tally in tallies {
                tally.on_cell_exit(ctx, self.cell(cell), &photon);
                tally.on_surface_crossing(ctx, self.surface(surface), &photon, mu);
            }

            let leaks = (mu > 0.0 && cell + 1 == self.cells) || (mu < 0.0 && cell == 0);
            if leaks {
                break;
            }
            cell = if mu > 0.0 { cell + 1 } else { cell - 1 };
            for tally in tallies {
                tally.on_cell_entry(ctx, self.cell(cell), &photon);
            }
        }

        for tally in tallies {
            tally.commit_history_contribution(ctx);
        }
    }
}

fn advance(photon: &mut ParticleState, distance: f64) {
    for (x, u) in photon.position.iter_mut().zip(photon.direction) {
        *x += u * distance;
    }
    photon.time += distance / SPEED_OF_LIGHT;
}

fn direction_from<R: Rng>(rng: &mut R, mu: f64) -> [f64; 3] {
    let phi = 2.0 * PI * rng.random::<f64>();
    let s = (1.0 - mu * mu).max(0.0).sqrt();
    [s * phi.cos(), s * phi.sin(), mu]
}

fn isotropic_direction<R: Rng>(rng: &mut R) -> [f64; 3] {
    let mu = rng.random_range(-1.0..=1.0);
    direction_from(rng, mu)
}

/// Uniform in cosine over the forward hemisphere, never grazing.
fn forward_direction<R: Rng>(rng: &mut R) -> [f64; 3] {
    let mu = 1.0 - rng.random::<f64>();
    direction_from(rng, mu)
}
