//! Tone-latent beam search
//!
//! One tone class is picked per source unit. Unlike the duration decoder
//! there is no length constraint, so every class is admissible for a live
//! beam.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use tracing::debug;

use crate::beam::{advance_by, select_top_k, Beam, BeamState, Candidate};
use crate::config::ToneSearchConfig;
use crate::error::{DecodeError, Result};

/// Output of one tone decoding step, `[batch_size, beam_width]` each
#[derive(Debug, Clone, PartialEq)]
pub struct ToneBeamSearchStep {
    pub prediction: Array2<i32>,
    pub log_prob: Array2<f64>,
    pub next_t: Array2<i32>,
    pub next_u: Array2<i32>,
    pub next_is_finished: Array2<bool>,
    pub beam_branch: Array2<i32>,
}

impl ToneBeamSearchStep {
    fn from_rows(rows: &[Vec<Candidate>], beam_width: usize) -> Self {
        let shape = (rows.len(), beam_width);
        Self {
            prediction: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].prediction),
            log_prob: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.log_prob),
            next_t: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.t),
            next_u: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.u),
            next_is_finished: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.is_finished),
            beam_branch: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].parent as i32),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToneLatentDecoder {
    config: ToneSearchConfig,
}

impl ToneLatentDecoder {
    pub fn new(config: ToneSearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ToneSearchConfig {
        &self.config
    }

    /// Advance one utterance by one step
    pub fn step(
        &self,
        h: ArrayView2<f32>,
        state: &BeamState,
        input_length: i32,
    ) -> Result<Vec<Candidate>> {
        let beam_width = self.config.beam_width;
        let classes = self.config.tone_class_size;
        if h.dim() != (beam_width, classes) {
            return Err(DecodeError::invalid_argument(format!(
                "h has shape {:?}, expected [{}, {}]",
                h.shape(),
                beam_width,
                classes
            )));
        }
        if state.len() != beam_width {
            return Err(DecodeError::invalid_argument(format!(
                "state has {} beams, expected {}",
                state.len(),
                beam_width
            )));
        }
        if input_length < 0 {
            return Err(DecodeError::invalid_argument(format!(
                "negative input_length {}",
                input_length
            )));
        }

        let mut candidates = Vec::with_capacity(beam_width * classes);
        for (w, beam) in state.beams().iter().enumerate() {
            if beam.is_finished || beam.t >= input_length {
                candidates.push(Candidate::frozen(*beam, w, self.config.empty_tone_id));
                continue;
            }
            let next_t = advance_by(beam.t, 1, "t")?;
            let next_u = advance_by(beam.u, 1, "u")?;
            for (tone, value) in h.row(w).iter().enumerate() {
                let score = self.config.score_scale.log_score(*value)?;
                candidates.push(Candidate {
                    prediction: tone as i32,
                    beam: Beam {
                        log_prob: beam.log_prob + score,
                        t: next_t,
                        u: next_u,
                        is_finished: next_t == input_length,
                        total_duration: 0,
                    },
                    parent: w,
                });
            }
        }

        Ok(select_top_k(candidates, beam_width))
    }
}

/// One tone-latent decoding step over raw tensors.
///
/// # Arguments
///
/// * `h` - Tone log-probabilities `[batch_size, beam_width, tone_class_size]`
/// * `log_prob_history`, `is_finished`, `t`, `u` - `[batch_size, beam_width]`
/// * `input_length` - Source units per batch element `[batch_size]`
/// * `empty_tone_id` - Prediction written for frozen beams
#[allow(clippy::too_many_arguments)]
pub fn tone_latent_beam_search_decode(
    h: ArrayView3<f32>,
    log_prob_history: ArrayView2<f64>,
    is_finished: ArrayView2<bool>,
    t: ArrayView2<i32>,
    u: ArrayView2<i32>,
    input_length: ArrayView1<i32>,
    beam_width: usize,
    tone_class_size: usize,
    empty_tone_id: i32,
) -> Result<ToneBeamSearchStep> {
    let decoder =
        ToneLatentDecoder::new(ToneSearchConfig::new(beam_width, tone_class_size, empty_tone_id))?;

    let batch_size = h.len_of(Axis(0));
    if input_length.len() != batch_size {
        return Err(DecodeError::invalid_argument(format!(
            "Incompatible batch sizes: h={}, input_length={}",
            batch_size,
            input_length.len()
        )));
    }
    for (name, dim) in [
        ("log_prob_history", log_prob_history.dim()),
        ("is_finished", is_finished.dim()),
        ("t", t.dim()),
        ("u", u.dim()),
    ] {
        if dim != (batch_size, beam_width) {
            return Err(DecodeError::invalid_argument(format!(
                "{} has shape {:?}, expected [{}, {}]",
                name, dim, batch_size, beam_width
            )));
        }
    }

    let states = (0..batch_size)
        .map(|b| {
            BeamState::from_arrays(
                log_prob_history.row(b),
                is_finished.row(b),
                t.row(b),
                u.row(b),
                None,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(batch_size, beam_width, tone_class_size, "tone latent step");
    let rows = (0..batch_size)
        .into_par_iter()
        .map(|b| decoder.step(h.index_axis(Axis(0), b), &states[b], input_length[b]))
        .collect::<Result<Vec<_>>>()?;

    Ok(ToneBeamSearchStep::from_rows(&rows, beam_width))
}
