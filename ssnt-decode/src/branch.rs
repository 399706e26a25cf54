//! Backtracking through recorded parent pointers
//!
//! `beam_branch[k][w]` is the slot in step `k - 1` that slot `w` of step `k`
//! descends from. Walking these pointers from a terminal slot back to step 0
//! recovers one full hypothesis.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::error::{DecodeError, Result};

fn check_slot(slot: i32, beam_width: usize, what: &str) -> Result<usize> {
    if slot < 0 || slot as usize >= beam_width {
        return Err(DecodeError::out_of_range(format!(
            "{} {} is not a slot in 0..{}",
            what, slot, beam_width
        )));
    }
    Ok(slot as usize)
}

fn check_width(actual: usize, beam_width: usize, what: &str) -> Result<()> {
    if beam_width < 1 {
        return Err(DecodeError::invalid_argument("beam_width must be >= 1"));
    }
    if actual != beam_width {
        return Err(DecodeError::invalid_argument(format!(
            "{} has beam dimension {}, expected {}",
            what, actual, beam_width
        )));
    }
    Ok(())
}

/// Slot occupied by the lineage of `final_slot` at every step, oldest first
fn walk(final_slot: i32, beam_branch: ArrayView2<i32>, beam_width: usize) -> Result<Vec<i32>> {
    let steps = beam_branch.nrows();
    let mut lineage = vec![0; steps];
    let mut slot = check_slot(final_slot, beam_width, "final branch")?;
    for k in (0..steps).rev() {
        lineage[k] = slot as i32;
        slot = check_slot(beam_branch[[k, slot]], beam_width, "parent pointer")?;
    }
    Ok(lineage)
}

/// Recover the lineage of one terminal slot.
///
/// # Arguments
///
/// * `best_final_branch` - Slot to start from in the last step
/// * `beam_branch` - Parent pointers `[steps, beam_width]`
/// * `t_history` - Positions `[steps, beam_width]`
/// * `beam_width` - Number of slots
///
/// # Returns
///
/// `(branch, t)`, each `[steps]`: the slot held at step `k` and its `t`
pub fn extract_best_beam_branch(
    best_final_branch: i32,
    beam_branch: ArrayView2<i32>,
    t_history: ArrayView2<i32>,
    beam_width: usize,
) -> Result<(Vec<i32>, Vec<i32>)> {
    check_width(beam_branch.ncols(), beam_width, "beam_branch")?;
    if t_history.dim() != beam_branch.dim() {
        return Err(DecodeError::invalid_argument(format!(
            "t_history has shape {:?}, beam_branch has {:?}",
            t_history.shape(),
            beam_branch.shape()
        )));
    }

    let branch = walk(best_final_branch, beam_branch, beam_width)?;
    let t = branch
        .iter()
        .enumerate()
        .map(|(k, slot)| t_history[[k, *slot as usize]])
        .collect();
    Ok((branch, t))
}

/// Batched [`extract_best_beam_branch`] over `[batch, steps, beam_width]`.
///
/// Returns `(branch, t)`, each `[batch, steps]`.
pub fn extract_best_beam_branch_batch(
    best_final_branch: ArrayView1<i32>,
    beam_branch: ArrayView3<i32>,
    t_history: ArrayView3<i32>,
    beam_width: usize,
) -> Result<(Array2<i32>, Array2<i32>)> {
    let (batch_size, steps, _) = beam_branch.dim();
    if best_final_branch.len() != batch_size || t_history.len_of(Axis(0)) != batch_size {
        return Err(DecodeError::invalid_argument(format!(
            "Incompatible batch sizes: best_final_branch={}, beam_branch={}, t_history={}",
            best_final_branch.len(),
            batch_size,
            t_history.len_of(Axis(0))
        )));
    }

    let rows = (0..batch_size)
        .into_par_iter()
        .map(|b| {
            extract_best_beam_branch(
                best_final_branch[b],
                beam_branch.index_axis(Axis(0), b),
                t_history.index_axis(Axis(0), b),
                beam_width,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let branch = Array2::from_shape_fn((batch_size, steps), |(b, k)| rows[b].0[k]);
    let t = Array2::from_shape_fn((batch_size, steps), |(b, k)| rows[b].1[k]);
    Ok((branch, t))
}

/// Lineage of every starting slot.
///
/// # Arguments
///
/// * `final_branch` - Starting slot per output row `[batch, beam_width]`
/// * `beam_branch` - Parent pointers `[batch, max_t, beam_width]`
///
/// # Returns
///
/// `[batch, beam_width, max_t]`: row `w` is the lineage of `final_branch[b][w]`
pub fn order_beam_branch(
    final_branch: ArrayView2<i32>,
    beam_branch: ArrayView3<i32>,
    beam_width: usize,
) -> Result<Array3<i32>> {
    let (batch_size, max_t, width) = beam_branch.dim();
    if final_branch.nrows() != batch_size {
        return Err(DecodeError::invalid_argument(format!(
            "Incompatible batch sizes: final_branch={}, beam_branch={}",
            final_branch.nrows(),
            batch_size
        )));
    }
    check_width(width, beam_width, "beam_branch")?;
    check_width(final_branch.ncols(), beam_width, "final_branch")?;

    let lineages = (0..batch_size)
        .into_par_iter()
        .map(|b| {
            let pointers = beam_branch.index_axis(Axis(0), b);
            final_branch
                .row(b)
                .iter()
                .map(|start| walk(*start, pointers, beam_width))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Array3::from_shape_fn(
        (batch_size, beam_width, max_t),
        |(b, w, k)| lineages[b][w][k],
    ))
}

/// [`order_beam_branch`] with slot `w` starting at `w`
pub fn order_all_beam_branches(
    beam_branch: ArrayView3<i32>,
    beam_width: usize,
) -> Result<Array3<i32>> {
    let batch_size = beam_branch.len_of(Axis(0));
    let final_branch = Array2::from_shape_fn((batch_size, beam_width), |(_, w)| w as i32);
    order_beam_branch(final_branch.view(), beam_branch, beam_width)
}

/// Slot to backtrack from: the best finished beam, else the best beam.
/// Ties go to the lowest slot.
pub fn best_final_branch(log_prob: ArrayView1<f64>, is_finished: ArrayView1<bool>) -> Result<i32> {
    if log_prob.is_empty() {
        return Err(DecodeError::invalid_argument("no beams to choose from"));
    }
    if log_prob.len() != is_finished.len() {
        return Err(DecodeError::invalid_argument(format!(
            "is_finished has {} beams, log_prob has {}",
            is_finished.len(),
            log_prob.len()
        )));
    }
    if log_prob.iter().any(|lp| lp.is_nan()) {
        return Err(DecodeError::numeric_degenerate("log_prob contains NaN"));
    }

    let best_of = |finished_only: bool| {
        let mut best: Option<usize> = None;
        for (w, lp) in log_prob.iter().enumerate() {
            if finished_only && !is_finished[w] {
                continue;
            }
            if best.map_or(true, |b| *lp > log_prob[b]) {
                best = Some(w);
            }
        }
        best
    };

    let slot = best_of(true).or_else(|| best_of(false)).unwrap_or(0);
    Ok(slot as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, arr3};

    fn lineage(ordered: &Array3<i32>, b: usize, w: usize) -> Vec<i32> {
        ordered.index_axis(Axis(0), b).row(w).to_vec()
    }

    #[test]
    fn test_extract_follows_parents() {
        // step 2 slot 1 <- step 1 slot 0 <- step 0 slot 1
        let beam_branch = arr2(&[[0, 0], [1, 0], [1, 0]]);
        let t_history = arr2(&[[1, 0], [2, 1], [3, 2]]);
        let (branch, t) =
            extract_best_beam_branch(1, beam_branch.view(), t_history.view(), 2).unwrap();

        assert_eq!(branch, vec![1, 0, 1]);
        assert_eq!(t, vec![0, 2, 2]);

        let (branch, t) =
            extract_best_beam_branch(0, beam_branch.view(), t_history.view(), 2).unwrap();
        assert_eq!(branch, vec![0, 1, 0]);
        assert_eq!(t, vec![1, 1, 3]);
    }

    #[test]
    fn test_extract_rejects_bad_pointer() {
        let beam_branch = arr2(&[[0, 0], [2, 0]]);
        let result = extract_best_beam_branch(0, beam_branch.view(), beam_branch.view(), 2);
        assert!(matches!(result, Err(DecodeError::OutOfRange(_))));

        let result = extract_best_beam_branch(-1, beam_branch.view(), beam_branch.view(), 2);
        assert!(matches!(result, Err(DecodeError::OutOfRange(_))));

        let result = extract_best_beam_branch(0, beam_branch.view(), beam_branch.view(), 3);
        assert!(matches!(result, Err(DecodeError::InvalidArgument(_))));
    }

    #[test]
    fn test_extract_no_steps() {
        let empty = Array2::<i32>::zeros((0, 3));
        let (branch, t) = extract_best_beam_branch(2, empty.view(), empty.view(), 3).unwrap();
        assert!(branch.is_empty());
        assert!(t.is_empty());
    }

    #[test]
    fn test_order_beam_branch() {
        let beam_branch = arr3(&[[[0, 0], [1, 0], [1, 0]]]);
        let ordered = order_all_beam_branches(beam_branch.view(), 2).unwrap();
        assert_eq!(ordered.dim(), (1, 2, 3));
        assert_eq!(lineage(&ordered, 0, 0), vec![0, 1, 0]);
        assert_eq!(lineage(&ordered, 0, 1), vec![1, 0, 1]);

        let swapped = order_beam_branch(arr2(&[[1, 1]]).view(), beam_branch.view(), 2).unwrap();
        assert_eq!(lineage(&swapped, 0, 0), vec![1, 0, 1]);
    }

    #[test]
    fn test_order_beam_branch_errors() {
        let beam_branch = arr3(&[[[0, 0], [1, 0]]]);
        let result = order_beam_branch(arr2(&[[0, 5]]).view(), beam_branch.view(), 2);
        assert!(matches!(result, Err(DecodeError::OutOfRange(_))));

        let result = order_beam_branch(arr2(&[[0, 1], [0, 1]]).view(), beam_branch.view(), 2);
        assert!(matches!(result, Err(DecodeError::InvalidArgument(_))));
    }

    #[test]
    fn test_best_final_branch() {
        let log_prob = arr1(&[-0.5, -1.0, -0.2, -1.0]);
        let finished = arr1(&[false, true, false, true]);
        // Best finished beam wins over a better live one; tie goes to slot 1
        assert_eq!(best_final_branch(log_prob.view(), finished.view()).unwrap(), 1);

        let none = arr1(&[false, false, false, false]);
        assert_eq!(best_final_branch(log_prob.view(), none.view()).unwrap(), 2);

        let dead = arr1(&[f64::NEG_INFINITY, f64::NEG_INFINITY]);
        let all = arr1(&[true, true]);
        assert_eq!(best_final_branch(dead.view(), all.view()).unwrap(), 0);
    }
}
