//! Binary shift/emit beam search
//!
//! Every live beam branches into a *shift* (advance one encoder frame) and an
//! *emit* (advance one output step) successor. All successors are pooled and
//! pruned back to `beam_width` with [`select_top_k`].

use ndarray::{Array1, ArrayView1, ArrayView2};
use tracing::debug;

use crate::beam::{advance_by, select_top_k, Beam, BeamState, Candidate};
use crate::config::BeamSearchConfig;
use crate::error::{DecodeError, Result};

/// Columns of `h`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Transition {
    /// `t + 1`, `u` unchanged
    Shift = 0,
    /// `t` unchanged, `u + 1`
    Emit = 1,
}

impl Transition {
    pub const COUNT: usize = 2;

    pub fn from_prediction(prediction: i32) -> Option<Self> {
        match prediction {
            0 => Some(Transition::Shift),
            1 => Some(Transition::Emit),
            _ => None,
        }
    }
}

/// Output of one decoding step, one entry per slot
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSearchStep {
    pub prediction: Array1<i32>,
    pub log_prob: Array1<f64>,
    pub next_t: Array1<i32>,
    pub next_u: Array1<i32>,
    pub is_finished: Array1<bool>,
    /// Slot in the previous step each output slot descends from
    pub beam_branch: Array1<i32>,
}

impl BeamSearchStep {
    fn from_candidates(selected: &[Candidate]) -> Self {
        Self {
            prediction: selected.iter().map(|c| c.prediction).collect(),
            log_prob: selected.iter().map(|c| c.beam.log_prob).collect(),
            next_t: selected.iter().map(|c| c.beam.t).collect(),
            next_u: selected.iter().map(|c| c.beam.u).collect(),
            is_finished: selected.iter().map(|c| c.beam.is_finished).collect(),
            beam_branch: selected.iter().map(|c| c.parent as i32).collect(),
        }
    }

    /// Beam state to feed into the next step
    pub fn state(&self) -> BeamState {
        let beams = (0..self.log_prob.len())
            .map(|w| Beam {
                log_prob: self.log_prob[w],
                t: self.next_t[w],
                u: self.next_u[w],
                is_finished: self.is_finished[w],
                total_duration: 0,
            })
            .collect();
        BeamState::from_beams(beams)
    }
}

/// Shift/emit decoder for a single utterance
#[derive(Debug, Clone)]
pub struct BeamSearchDecoder {
    config: BeamSearchConfig,
}

impl BeamSearchDecoder {
    pub fn new(config: BeamSearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    /// Advance `state` by one step.
    ///
    /// # Arguments
    ///
    /// * `h` - Emission scores `[beam_width, 2]`, column 0 = shift, 1 = emit
    /// * `state` - Current beams (`beam_width` of them)
    ///
    /// # Returns
    ///
    /// The `beam_width` selected successors, best first
    pub fn step(&self, h: ArrayView2<f32>, state: &BeamState) -> Result<Vec<Candidate>> {
        let beam_width = self.config.beam_width;
        if h.dim() != (beam_width, Transition::COUNT) {
            return Err(DecodeError::invalid_argument(format!(
                "h has shape {:?}, expected [{}, {}]",
                h.shape(),
                beam_width,
                Transition::COUNT
            )));
        }
        if state.len() != beam_width {
            return Err(DecodeError::invalid_argument(format!(
                "state has {} beams, expected {}",
                state.len(),
                beam_width
            )));
        }

        let max_t = self.config.max_t;
        let scale = self.config.score_scale;
        let mut candidates = Vec::with_capacity(beam_width * Transition::COUNT);

        for (w, beam) in state.beams().iter().enumerate() {
            if beam.is_finished || beam.t >= max_t {
                candidates.push(Candidate::frozen(*beam, w, Transition::Shift as i32));
                continue;
            }

            let shift = scale.log_score(h[[w, Transition::Shift as usize]])?;
            let emit = scale.log_score(h[[w, Transition::Emit as usize]])?;

            let mut shifted = *beam;
            shifted.log_prob += shift;
            shifted.t = advance_by(beam.t, 1, "t")?;
            shifted.is_finished = shifted.t >= max_t;
            candidates.push(Candidate {
                prediction: Transition::Shift as i32,
                beam: shifted,
                parent: w,
            });

            let mut emitted = *beam;
            emitted.log_prob += emit;
            emitted.u = advance_by(beam.u, 1, "u")?;
            candidates.push(Candidate {
                prediction: Transition::Emit as i32,
                beam: emitted,
                parent: w,
            });
        }

        debug!(
            beam_width,
            pool = candidates.len(),
            finished = state.beams().iter().filter(|b| b.is_finished).count(),
            "shift/emit step"
        );
        Ok(select_top_k(candidates, beam_width))
    }
}

/// One shift/emit decoding step over raw tensors.
///
/// # Arguments
///
/// * `h` - Emission probabilities `[beam_width, 2]` (shift, emit)
/// * `log_prob_history` - Cumulative scores `[beam_width]`
/// * `is_finished` - Finished flags `[beam_width]`
/// * `t`, `u` - Current lattice positions `[beam_width]`
/// * `max_t` - Number of encoder frames
/// * `beam_width` - Number of beams
///
/// # Example
///
/// ```
/// use ndarray::{arr1, arr2};
/// use ssnt_decode::beam_search_decode;
///
/// let h = arr2(&[[0.2_f32, 0.8], [0.2, 0.8]]);
/// let step = beam_search_decode(
///     h.view(),
///     arr1(&[0.0, 0.0]).view(),
///     arr1(&[false, false]).view(),
///     arr1(&[0, 0]).view(),
///     arr1(&[0, 0]).view(),
///     4,
///     2,
/// )?;
/// assert_eq!(step.next_u[0], 1); // emit is the likelier branch
/// # Ok::<(), ssnt_decode::DecodeError>(())
/// ```
pub fn beam_search_decode(
    h: ArrayView2<f32>,
    log_prob_history: ArrayView1<f64>,
    is_finished: ArrayView1<bool>,
    t: ArrayView1<i32>,
    u: ArrayView1<i32>,
    max_t: i32,
    beam_width: usize,
) -> Result<BeamSearchStep> {
    let decoder = BeamSearchDecoder::new(BeamSearchConfig::new(beam_width, max_t))?;
    let state = BeamState::from_arrays(log_prob_history, is_finished, t, u, None)?;
    let selected = decoder.step(h, &state)?;
    Ok(BeamSearchStep::from_candidates(&selected))
}
