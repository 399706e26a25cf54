//! Duration-aware beam search (SSNT-TTS v2)
//!
//! Each step assigns a duration class to the current source unit of every
//! live beam. A hypothesis accumulates the frames of its chosen classes in
//! `total_duration`; in teacher-forced mode that total must land exactly on
//! the known output length once the last source unit is consumed.
//!
//! Batch elements never interact and are decoded in parallel.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::beam::{advance_by, select_top_k, Beam, BeamState, Candidate};
use crate::config::DurationSearchConfig;
use crate::duration::DurationTable;
use crate::error::{DecodeError, Result};

/// Output of one decoding step, `[batch_size, beam_width]` each
#[derive(Debug, Clone, PartialEq)]
pub struct DurationBeamSearchStep {
    pub prediction: Array2<i32>,
    pub log_prob: Array2<f64>,
    pub next_t: Array2<i32>,
    pub next_u: Array2<i32>,
    pub next_is_finished: Array2<bool>,
    pub next_total_duration: Array2<i32>,
    pub beam_branch: Array2<i32>,
}

impl DurationBeamSearchStep {
    pub(crate) fn from_rows(rows: &[Vec<Candidate>], beam_width: usize) -> Self {
        let shape = (rows.len(), beam_width);
        Self {
            prediction: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].prediction),
            log_prob: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.log_prob),
            next_t: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.t),
            next_u: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.u),
            next_is_finished: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].beam.is_finished),
            next_total_duration: Array2::from_shape_fn(shape, |(b, w)| {
                rows[b][w].beam.total_duration
            }),
            beam_branch: Array2::from_shape_fn(shape, |(b, w)| rows[b][w].parent as i32),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.log_prob.nrows()
    }

    /// Beam state of batch element `b`, ready for the next step
    pub fn state(&self, b: usize) -> BeamState {
        let beams = (0..self.log_prob.ncols())
            .map(|w| Beam {
                log_prob: self.log_prob[[b, w]],
                t: self.next_t[[b, w]],
                u: self.next_u[[b, w]],
                is_finished: self.next_is_finished[[b, w]],
                total_duration: self.next_total_duration[[b, w]],
            })
            .collect();
        BeamState::from_beams(beams)
    }
}

/// Duration-class beam search decoder
#[derive(Debug, Clone)]
pub struct DurationBeamSearchDecoder {
    config: DurationSearchConfig,
}

impl DurationBeamSearchDecoder {
    pub fn new(config: DurationSearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DurationSearchConfig {
        &self.config
    }

    pub fn duration_table(&self) -> &DurationTable {
        &self.config.duration_table
    }

    /// Output length the search is steered towards; always 0 in test mode
    pub fn target_length(&self, output_length: i32) -> i32 {
        if self.config.test_mode {
            0
        } else {
            output_length
        }
    }

    /// Advance one utterance by one step.
    ///
    /// # Arguments
    ///
    /// * `h` - Emission scores `[beam_width, duration_class_size]`
    /// * `state` - Current beams
    /// * `input_length` - Number of source units of this utterance
    /// * `output_length` - Target frame count (ignored in test mode)
    pub fn step(
        &self,
        h: ArrayView2<f32>,
        state: &BeamState,
        input_length: i32,
        output_length: i32,
    ) -> Result<Vec<Candidate>> {
        self.check_utterance(h, state, input_length, output_length)?;
        self.step_unchecked(h, state, input_length, output_length)
    }

    /// Advance every batch element by one step, in parallel.
    pub fn step_batch(
        &self,
        h: ArrayView3<f32>,
        states: &[BeamState],
        input_length: ArrayView1<i32>,
        output_length: ArrayView1<i32>,
    ) -> Result<Vec<Vec<Candidate>>> {
        let batch_size = states.len();
        if h.len_of(Axis(0)) != batch_size
            || input_length.len() != batch_size
            || output_length.len() != batch_size
        {
            return Err(DecodeError::invalid_argument(format!(
                "Incompatible batch sizes: h={}, states={}, input_length={}, output_length={}",
                h.len_of(Axis(0)),
                batch_size,
                input_length.len(),
                output_length.len()
            )));
        }
        for (b, state) in states.iter().enumerate() {
            self.check_utterance(
                h.index_axis(Axis(0), b),
                state,
                input_length[b],
                output_length[b],
            )?;
        }
        if self.config.test_mode {
            debug!(batch_size, "test mode: output_length forced to 0");
        }

        states
            .par_iter()
            .enumerate()
            .map(|(b, state)| {
                self.step_unchecked(
                    h.index_axis(Axis(0), b),
                    state,
                    input_length[b],
                    output_length[b],
                )
            })
            .collect()
    }

    fn check_utterance(
        &self,
        h: ArrayView2<f32>,
        state: &BeamState,
        input_length: i32,
        output_length: i32,
    ) -> Result<()> {
        let beam_width = self.config.beam_width;
        let class_size = self.duration_table().len();
        if h.dim() != (beam_width, class_size) {
            return Err(DecodeError::invalid_argument(format!(
                "h has shape {:?}, expected [{}, {}]",
                h.shape(),
                beam_width,
                class_size
            )));
        }
        if state.len() != beam_width {
            return Err(DecodeError::invalid_argument(format!(
                "state has {} beams, expected {}",
                state.len(),
                beam_width
            )));
        }
        if input_length < 0 || output_length < 0 {
            return Err(DecodeError::invalid_argument(format!(
                "negative length (input_length={}, output_length={})",
                input_length, output_length
            )));
        }
        let max_frames = self.duration_table().max_frames();
        for (w, beam) in state.beams().iter().enumerate() {
            if beam.total_duration.checked_add(max_frames).is_none() {
                return Err(DecodeError::invalid_argument(format!(
                    "beam {} total_duration {} overflows with a {}-frame class",
                    w, beam.total_duration, max_frames
                )));
            }
        }
        Ok(())
    }

    fn step_unchecked(
        &self,
        h: ArrayView2<f32>,
        state: &BeamState,
        input_length: i32,
        output_length: i32,
    ) -> Result<Vec<Candidate>> {
        let target = self.target_length(output_length);
        let mut candidates = Vec::with_capacity(h.len());
        for (w, beam) in state.beams().iter().enumerate() {
            let expanded = self.expand(h.row(w), beam, w, input_length, target)?;
            candidates.extend(expanded);
        }

        debug!(
            input_length,
            target,
            pool = candidates.len(),
            "duration step"
        );
        Ok(select_top_k(candidates, self.config.beam_width))
    }

    fn expand(
        &self,
        scores: ArrayView1<f32>,
        beam: &Beam,
        parent: usize,
        input_length: i32,
        target: i32,
    ) -> Result<Vec<Candidate>> {
        let table = self.duration_table();
        let skip_id = table.zero_duration_id() as i32;

        if beam.is_finished || beam.t >= input_length {
            return Ok(vec![Candidate::frozen(*beam, parent, skip_id)]);
        }

        let next_t = advance_by(beam.t, 1, "t")?;
        let next_u = advance_by(beam.u, 1, "u")?;
        let remaining = input_length - next_t;
        let mut out = Vec::with_capacity(table.len());

        for (class, value) in scores.iter().enumerate() {
            if table.is_skip(class) && !self.config.allow_skip {
                continue;
            }
            let score = self.config.score_scale.log_score(*value)?;
            let total = advance_by(beam.total_duration, table.frames(class), "total_duration")?;
            if !self.admissible(total, remaining, target) {
                continue;
            }
            out.push(Candidate {
                prediction: class as i32,
                beam: Beam {
                    log_prob: beam.log_prob + score,
                    t: next_t,
                    u: next_u,
                    is_finished: remaining == 0,
                    total_duration: total,
                },
                parent,
            });
        }

        if out.is_empty() {
            warn!(
                parent,
                t = beam.t,
                total_duration = beam.total_duration,
                target,
                "no admissible duration class, dropping beam"
            );
            out.push(Candidate {
                prediction: skip_id,
                beam: Beam {
                    log_prob: f64::NEG_INFINITY,
                    ..beam.frozen()
                },
                parent,
            });
        }
        Ok(out)
    }

    /// Whether a hypothesis with `total` frames and `remaining` source units
    /// left can still satisfy the length constraint.
    fn admissible(&self, total: i32, remaining: i32, target: i32) -> bool {
        if self.config.test_mode {
            return self.config.max_total_duration.map_or(true, |cap| total <= cap);
        }
        if total > target {
            return false;
        }
        if remaining == 0 {
            return total == target;
        }
        let table = self.duration_table();
        let needed = i64::from(target - total);
        let most = i64::from(remaining) * i64::from(table.max_frames());
        let least = i64::from(remaining) * i64::from(table.min_frames(self.config.allow_skip));
        least <= needed && needed <= most
    }
}

/// One duration-aware decoding step over raw tensors.
///
/// # Arguments
///
/// * `h` - Emission log-probabilities `[batch_size, beam_width, duration_class_size]`
/// * `log_prob_history`, `is_finished`, `total_duration`, `t`, `u` - `[batch_size, beam_width]`
/// * `duration_table` - Frames per duration class `[duration_class_size]`
/// * `input_length`, `output_length` - `[batch_size]`
/// * `zero_duration_id` - The skip class
/// * `allow_skip` - Whether the skip class may be chosen
/// * `test_mode` - Free-running inference; `output_length` is treated as 0
#[allow(clippy::too_many_arguments)]
pub fn ssnt_tts_v2_beam_search_decode(
    h: ArrayView3<f32>,
    log_prob_history: ArrayView2<f64>,
    is_finished: ArrayView2<bool>,
    total_duration: ArrayView2<i32>,
    duration_table: ArrayView1<i32>,
    t: ArrayView2<i32>,
    u: ArrayView2<i32>,
    input_length: ArrayView1<i32>,
    output_length: ArrayView1<i32>,
    beam_width: usize,
    duration_class_size: usize,
    zero_duration_id: i32,
    allow_skip: bool,
    test_mode: bool,
) -> Result<DurationBeamSearchStep> {
    let table = DurationTable::from_raw(
        &duration_table.to_vec(),
        duration_class_size,
        zero_duration_id,
    )?;
    let config = DurationSearchConfig::with_table(table)
        .beam_width(beam_width)
        .allow_skip(allow_skip)
        .test_mode(test_mode);
    let decoder = DurationBeamSearchDecoder::new(config)?;

    let batch_size = h.len_of(Axis(0));
    for (name, dim) in [
        ("log_prob_history", log_prob_history.dim()),
        ("is_finished", is_finished.dim()),
        ("total_duration", total_duration.dim()),
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
                Some(total_duration.row(b)),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let rows = decoder.step_batch(h, &states, input_length, output_length)?;
    Ok(DurationBeamSearchStep::from_rows(&rows, beam_width))
}
