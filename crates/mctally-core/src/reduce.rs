//! Cross-rank reduction.
//!
//! A [`Communicator`] is the collective seam a distributed run plugs into.
//! Two implementations ship here: [`SerialCommunicator`] for single-process
//! runs and [`LocalCommunicator`], whose ranks are threads of one process
//! (used by the CLI and the tests to exercise the collective path).

use std::sync::{Arc, Barrier, Mutex};

use thiserror::Error;

use crate::tally::lock;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("root rank {root} is out of range for {size} rank(s)")]
    InvalidRoot { root: usize, size: usize },

    #[error("rank {rank} contributed {got} values, expected {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },

    #[error("rank {rank} did not contribute to the collective")]
    MissingContribution { rank: usize },
}

/// Blocking collectives over a fixed group of ranks.
///
/// Every rank of the group must enter each collective, in the same order.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn barrier(&self) -> Result<(), CommError>;

    /// Element-wise sum of every rank's `values`. The root receives
    /// `Some(sum)`, every other rank `None`.
    fn reduce_sum(&self, values: &[f64], root: usize) -> Result<Option<Vec<f64>>, CommError>;
}

/// The group of one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), CommError> {
        Ok(())
    }

    fn reduce_sum(&self, values: &[f64], root: usize) -> Result<Option<Vec<f64>>, CommError> {
        if root != 0 {
            return Err(CommError::InvalidRoot { root, size: 1 });
        }
        Ok(Some(values.to_vec()))
    }
}

#[derive(Debug)]
struct Shared {
    barrier: Barrier,
    buffers: Mutex<Vec<Option<Vec<f64>>>>,
    outcome: Mutex<Option<CommError>>,
}

/// One rank of an in-process group; hand each rank to its own thread.
#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl LocalCommunicator {
    /// Create the `size` ranks of a new group.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size.max(1)),
            buffers: Mutex::new(vec![None; size]),
            outcome: Mutex::new(None),
        });
        (0..size)
            .map(|rank| LocalCommunicator {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn sum_buffers(&self) -> Result<Vec<f64>, CommError> {
        let buffers = std::mem::replace(&mut *lock(&self.shared.buffers), vec![None; self.size]);
        let mut sum: Option<Vec<f64>> = None;
        for (rank, buffer) in buffers.into_iter().enumerate() {
            let buffer = buffer.ok_or(CommError::MissingContribution { rank })?;
            match sum.as_mut() {
                None => sum = Some(buffer),
                Some(acc) => {
                    if acc.len() != buffer.len() {
                        return Err(CommError::LengthMismatch {
                            rank,
                            expected: acc.len(),
                            got: buffer.len(),
                        });
                    }
                    acc.iter_mut().zip(buffer).for_each(|(a, b)| *a += b);
                }
            }
        }
        Ok(sum.unwrap_or_default())
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn reduce_sum(&self, values: &[f64], root: usize) -> Result<Option<Vec<f64>>, CommError> {
        if root >= self.size {
            return Err(CommError::InvalidRoot {
                root,
                size: self.size,
            });
        }

        lock(&self.shared.buffers)[self.rank] = Some(values.to_vec());
        self.shared.barrier.wait();

        let mut reduced = None;
        if self.rank == root {
            let outcome = self.sum_buffers();
            *lock(&self.shared.outcome) = outcome.as_ref().err().cloned();
            reduced = outcome.ok();
        }
        self.shared.barrier.wait();

        match lock(&self.shared.outcome).clone() {
            Some(err) => Err(err),
            None => Ok(reduced),
        }
    }
}
