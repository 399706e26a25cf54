//! Per-step lineage records kept by the decode loop

use ndarray::{Array2, Array3, Axis};

use crate::beam::Candidate;
use crate::error::{DecodeError, Result};

/// Arena of step-indexed rows for a batch of utterances
///
/// Row `k` holds, for every batch element and slot, the parent slot in step
/// `k - 1`, the position `t` reached and the class chosen at step `k`.
#[derive(Debug, Clone, Default)]
pub struct BranchHistory {
    batch_size: usize,
    beam_width: usize,
    parents: Vec<Array2<i32>>,
    t: Vec<Array2<i32>>,
    predictions: Vec<Array2<i32>>,
}

impl BranchHistory {
    pub fn new(batch_size: usize, beam_width: usize) -> Self {
        Self {
            batch_size,
            beam_width,
            ..Default::default()
        }
    }

    /// Record one step of selected candidates, `[batch][beam_width]`
    pub fn push_step(&mut self, selected: &[Vec<Candidate>]) -> Result<()> {
        if selected.len() != self.batch_size
            || selected.iter().any(|row| row.len() != self.beam_width)
        {
            return Err(DecodeError::invalid_argument(format!(
                "step does not have shape [{}, {}]",
                self.batch_size, self.beam_width
            )));
        }
        let shape = (self.batch_size, self.beam_width);
        self.parents.push(Array2::from_shape_fn(shape, |(b, w)| {
            selected[b][w].parent as i32
        }));
        self.t
            .push(Array2::from_shape_fn(shape, |(b, w)| selected[b][w].beam.t));
        self.predictions.push(Array2::from_shape_fn(shape, |(b, w)| {
            selected[b][w].prediction
        }));
        Ok(())
    }

    pub fn num_steps(&self) -> usize {
        self.parents.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn beam_width(&self) -> usize {
        self.beam_width
    }

    /// Parent pointers of batch element `b`, `[steps, beam_width]`
    pub fn beam_branch(&self, b: usize) -> Array2<i32> {
        Self::gather(&self.parents, b, self.beam_width)
    }

    /// Positions of batch element `b`, `[steps, beam_width]`
    pub fn t_history(&self, b: usize) -> Array2<i32> {
        Self::gather(&self.t, b, self.beam_width)
    }

    /// Chosen classes of batch element `b`, `[steps, beam_width]`
    pub fn prediction(&self, b: usize) -> Array2<i32> {
        Self::gather(&self.predictions, b, self.beam_width)
    }

    /// All parent pointers, `[batch, steps, beam_width]`
    pub fn beam_branch_tensor(&self) -> Array3<i32> {
        let shape = (self.batch_size, self.num_steps(), self.beam_width);
        Array3::from_shape_fn(shape, |(b, k, w)| self.parents[k][[b, w]])
    }

    fn gather(rows: &[Array2<i32>], b: usize, beam_width: usize) -> Array2<i32> {
        Array2::from_shape_fn((rows.len(), beam_width), |(k, w)| {
            rows[k].index_axis(Axis(0), b)[w]
        })
    }
}
