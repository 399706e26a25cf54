//! Expand per-source-unit durations into a frame-level source index map

use ndarray::{Array2, Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis};
use rayon::prelude::*;
use tracing::debug;

use crate::config::UpsampleConfig;
use crate::error::{DecodeError, Result};

/// Run-length expand one duration row into `out`.
///
/// Frame `j` receives source index `i` for every `j` covered by unit `i`;
/// frames past `min(sum(duration), output_length)` keep `fill`.
fn upsample_row(
    duration: ArrayView1<i32>,
    output_length: usize,
    fill: i32,
    mut out: ArrayViewMut1<i32>,
) {
    out.fill(fill);
    let limit = output_length.min(out.len());
    let mut frame = 0usize;
    for (source, d) in duration.iter().enumerate() {
        if frame >= limit {
            break;
        }
        let end = (frame + *d as usize).min(limit);
        for j in frame..end {
            out[j] = source as i32;
        }
        frame = end;
    }
}

/// Source index of every output frame.
///
/// # Arguments
///
/// * `duration` - Frames per source unit `[batch_size, beam_width, max_t]`
/// * `output_length` - Output frames per batch element `[batch_size]`
/// * `out_of_range_source_index` - Fill value for frames past the output
/// * `beam_width` - Size of the second axis of `duration`
///
/// # Returns
///
/// `[batch_size, beam_width, max(output_length)]`
///
/// # Example
///
/// ```
/// use ndarray::{arr1, Array3};
/// use ssnt_decode::upsample_source_indexes;
///
/// let duration = Array3::from_shape_vec((1, 1, 6), vec![0, 3, 2, 1, 0, 0]).unwrap();
/// let upsampled = upsample_source_indexes(duration.view(), arr1(&[6]).view(), -1, 1)?;
/// assert_eq!(upsampled.into_raw_vec_and_offset().0, vec![1, 1, 1, 2, 2, 3]);
/// # Ok::<(), ssnt_decode::DecodeError>(())
/// ```
pub fn upsample_source_indexes(
    duration: ArrayView3<i32>,
    output_length: ArrayView1<i32>,
    out_of_range_source_index: i32,
    beam_width: usize,
) -> Result<Array3<i32>> {
    let config = UpsampleConfig::new(out_of_range_source_index);
    upsample_with_config(duration, output_length, beam_width, &config)
}

/// [`upsample_source_indexes`] with the full set of options
pub fn upsample_with_config(
    duration: ArrayView3<i32>,
    output_length: ArrayView1<i32>,
    beam_width: usize,
    config: &UpsampleConfig,
) -> Result<Array3<i32>> {
    let (batch_size, width, max_t) = duration.dim();
    if beam_width < 1 {
        return Err(DecodeError::invalid_argument("beam_width must be >= 1"));
    }
    if width != beam_width {
        return Err(DecodeError::invalid_argument(format!(
            "duration has beam dimension {}, expected {}",
            width, beam_width
        )));
    }
    if output_length.len() != batch_size {
        return Err(DecodeError::invalid_argument(format!(
            "Incompatible batch sizes: duration={}, output_length={}",
            batch_size,
            output_length.len()
        )));
    }
    if let Some(len) = output_length.iter().find(|l| **l < 0) {
        return Err(DecodeError::invalid_argument(format!(
            "negative output_length {}",
            len
        )));
    }
    if let Some(d) = duration.iter().find(|d| **d < 0) {
        return Err(DecodeError::invalid_argument(format!(
            "negative duration {}",
            d
        )));
    }
    if config.strict {
        for (b, rows) in duration.outer_iter().enumerate() {
            for (w, row) in rows.outer_iter().enumerate() {
                let total: i64 = row.iter().map(|d| i64::from(*d)).sum();
                if total != i64::from(output_length[b]) {
                    return Err(DecodeError::invalid_argument(format!(
                        "duration[{}][{}] sums to {}, output_length is {}",
                        b, w, total, output_length[b]
                    )));
                }
            }
        }
    }

    let max_u = output_length.iter().copied().max().unwrap_or(0) as usize;
    debug!(batch_size, beam_width, max_t, max_u, "upsampling source indexes");

    let fill = config.out_of_range_source_index;
    let planes: Vec<Array2<i32>> = (0..batch_size)
        .into_par_iter()
        .map(|b| {
            let mut plane = Array2::from_elem((beam_width, max_u), fill);
            for (w, row) in duration.index_axis(Axis(0), b).outer_iter().enumerate() {
                upsample_row(row, output_length[b] as usize, fill, plane.row_mut(w));
            }
            plane
        })
        .collect();

    let mut upsampled = Array3::from_elem((batch_size, beam_width, max_u), fill);
    for (b, plane) in planes.into_iter().enumerate() {
        upsampled.index_axis_mut(Axis(0), b).assign(&plane);
    }
    Ok(upsampled)
}
