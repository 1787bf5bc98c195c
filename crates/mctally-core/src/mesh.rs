//! Mesh track segmentation seam.
//!
//! Ray/mesh intersection belongs to the geometry layer. A mesh tally only
//! needs the per-element lengths of one straight track, which callers supply
//! through [`MeshTrackSegmenter`].

use crate::registry::EntityId;

/// Splits a straight track into per-element lengths.
pub trait MeshTrackSegmenter: Send + Sync {
    /// `(element, length)` pairs for the track from `start` to `end`.
    /// Elements the track does not touch are omitted.
    fn segments(&self, start: [f64; 3], end: [f64; 3]) -> Vec<(EntityId, f64)>;
}

/// A mesh of slabs stacked along z, unbounded in x and y.
///
/// Element `first_element + i` spans `planes[i]..planes[i + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AxialMesh {
    planes: Vec<f64>,
    first_element: u64,
}

impl AxialMesh {
    /// Returns `None` unless there are at least two strictly ascending planes.
    pub fn new(planes: Vec<f64>, first_element: u64) -> Option<Self> {
        let ascending = planes.len() >= 2
            && planes.iter().all(|p| p.is_finite())
            && planes.windows(2).all(|w| w[0] < w[1]);
        ascending.then_some(Self {
            planes,
            first_element,
        })
    }

    pub fn elements(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.planes.len() as u64 - 1).map(|i| EntityId(self.first_element + i))
    }

    /// Thickness of each element along z.
    pub fn thicknesses(&self) -> Vec<f64> {
        self.planes.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl MeshTrackSegmenter for AxialMesh {
    fn segments(&self, start: [f64; 3], end: [f64; 3]) -> Vec<(EntityId, f64)> {
        let delta = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
        let length = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
        if length == 0.0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        for (i, w) in self.planes.windows(2).enumerate() {
            let element = EntityId(self.first_element + i as u64);
            if delta[2] == 0.0 {
                if start[2] >= w[0] && start[2] < w[1] {
                    out.push((element, length));
                }
                continue;
            }
            let ta = (w[0] - start[2]) / delta[2];
            let tb = (w[1] - start[2]) / delta[2];
            let lo = ta.min(tb).max(0.0);
            let hi = ta.max(tb).min(1.0);
            if hi > lo {
                out.push((element, (hi - lo) * length));
            }
        }
        out
    }
}
