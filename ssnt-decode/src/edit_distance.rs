//! Levenshtein distance between padded id sequences

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::{DecodeError, Result};

/// Edit distance between two sequences (unit cost insert/delete/substitute)
pub fn levenshtein(a: &[i32], b: &[i32]) -> i32 {
    // Single rolling row over `b`
    let mut row: Vec<i32> = (0..=b.len() as i32).collect();
    for (m, x) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = m as i32 + 1;
        for (n, y) in b.iter().enumerate() {
            let substitute = diagonal + i32::from(x != y);
            let delete = row[n + 1] + 1;
            let insert = row[n] + 1;
            diagonal = row[n + 1];
            row[n + 1] = substitute.min(delete).min(insert);
        }
    }
    row[b.len()]
}

/// Batched edit distance.
///
/// # Arguments
///
/// * `a`, `b` - Padded sequences `[batch_size, max_length]`
/// * `a_lengths`, `b_lengths` - Valid prefix length of each row `[batch_size]`
///
/// # Returns
///
/// Distance per batch element `[batch_size]`
pub fn levenshtein_edit_distance(
    a: ArrayView2<i32>,
    b: ArrayView2<i32>,
    a_lengths: ArrayView1<i32>,
    b_lengths: ArrayView1<i32>,
) -> Result<Array1<i32>> {
    let batch_size = a.nrows();
    if b.nrows() != batch_size || a_lengths.len() != batch_size || b_lengths.len() != batch_size {
        return Err(DecodeError::invalid_argument(format!(
            "Incompatible batch sizes: a={}, b={}, a_lengths={}, b_lengths={}",
            batch_size,
            b.nrows(),
            a_lengths.len(),
            b_lengths.len()
        )));
    }
    check_lengths(a_lengths, a.ncols(), "a_lengths")?;
    check_lengths(b_lengths, b.ncols(), "b_lengths")?;

    let distances: Vec<i32> = (0..batch_size)
        .into_par_iter()
        .map(|i| {
            let x = a.index_axis(Axis(0), i);
            let y = b.index_axis(Axis(0), i);
            let x: Vec<i32> = x.iter().take(a_lengths[i] as usize).copied().collect();
            let y: Vec<i32> = y.iter().take(b_lengths[i] as usize).copied().collect();
            levenshtein(&x, &y)
        })
        .collect();
    Ok(Array1::from(distances))
}

fn check_lengths(lengths: ArrayView1<i32>, max_length: usize, name: &str) -> Result<()> {
    match lengths
        .iter()
        .find(|l| **l < 0 || **l as usize > max_length)
    {
        Some(l) => Err(DecodeError::invalid_argument(format!(
            "{} entry {} is outside [0, {}]",
            name, l, max_length
        ))),
        None => Ok(()),
    }
}
