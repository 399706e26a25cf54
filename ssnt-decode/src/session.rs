//! Stateful duration search over a batch of utterances
//!
//! [`DurationSearch`] owns everything a full decode needs between steps: the
//! beams of every batch element, the lineage arena and the step counter. The
//! caller only supplies emission scores for the current beams.

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis};
use tracing::{debug, info};

use crate::beam::BeamState;
use crate::branch::{best_final_branch, extract_best_beam_branch};
use crate::config::{DurationSearchConfig, UpsampleConfig};
use crate::duration_decoder::DurationBeamSearchDecoder;
use crate::error::{DecodeError, Result};
use crate::history::BranchHistory;
use crate::upsample::upsample_with_config;

/// Best hypothesis of every batch element
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Final slot the hypothesis was read from `[batch_size]`
    pub best_branch: Array1<i32>,
    /// Score of the hypothesis `[batch_size]`
    pub log_prob: Array1<f64>,
    /// Frames realized by the hypothesis `[batch_size]`
    pub total_duration: Array1<i32>,
    /// Duration class chosen per source unit `[batch_size, max_input_length]`
    pub duration_class: Array2<i32>,
    /// Frames per source unit `[batch_size, max_input_length]`
    pub durations: Array2<i32>,
    /// Source unit of every output frame `[batch_size, max_output_length]`,
    /// `-1` past the end
    pub source_indexes: Array2<i32>,
}

/// A running duration beam search
pub struct DurationSearch {
    decoder: DurationBeamSearchDecoder,
    input_length: Array1<i32>,
    output_length: Array1<i32>,
    states: Vec<BeamState>,
    history: BranchHistory,
}

impl DurationSearch {
    /// Start a search.
    ///
    /// `output_length` is the target frame count per utterance; it is ignored
    /// in test mode and may be all zeros there.
    pub fn new(
        config: DurationSearchConfig,
        input_length: Array1<i32>,
        output_length: Array1<i32>,
    ) -> Result<Self> {
        if input_length.len() != output_length.len() {
            return Err(DecodeError::invalid_argument(format!(
                "Incompatible batch sizes: input_length={}, output_length={}",
                input_length.len(),
                output_length.len()
            )));
        }
        if input_length.iter().chain(output_length.iter()).any(|l| *l < 0) {
            return Err(DecodeError::invalid_argument("lengths must be non-negative"));
        }

        let beam_width = config.beam_width;
        let batch_size = input_length.len();
        info!(
            batch_size,
            beam_width,
            test_mode = config.test_mode,
            allow_skip = config.allow_skip,
            "starting duration search"
        );

        Ok(Self {
            decoder: DurationBeamSearchDecoder::new(config)?,
            states: vec![BeamState::initial(beam_width); batch_size],
            history: BranchHistory::new(batch_size, beam_width),
            input_length,
            output_length,
        })
    }

    pub fn config(&self) -> &DurationSearchConfig {
        self.decoder.config()
    }

    pub fn batch_size(&self) -> usize {
        self.states.len()
    }

    /// Current beams, one state per batch element
    pub fn states(&self) -> &[BeamState] {
        &self.states
    }

    pub fn history(&self) -> &BranchHistory {
        &self.history
    }

    pub fn num_steps(&self) -> usize {
        self.history.num_steps()
    }

    /// True once every beam is finished or the step budget is spent
    pub fn is_done(&self) -> bool {
        let budget_spent = self
            .config()
            .max_steps
            .map_or(false, |max| self.num_steps() >= max);
        budget_spent || self.states.iter().all(BeamState::all_finished)
    }

    /// Run one step with scores `[batch_size, beam_width, duration_class_size]`
    pub fn step(&mut self, h: ArrayView3<f32>) -> Result<()> {
        if self.is_done() {
            return Err(DecodeError::invalid_argument(format!(
                "search already finished after {} steps",
                self.num_steps()
            )));
        }

        let rows = self.decoder.step_batch(
            h,
            &self.states,
            self.input_length.view(),
            self.output_length.view(),
        )?;
        self.history.push_step(&rows)?;
        self.states = rows.iter().map(|r| BeamState::advance(r)).collect();

        debug!(
            step = self.num_steps(),
            finished = self
                .states
                .iter()
                .map(|s| s.beams().iter().filter(|b| b.is_finished).count())
                .sum::<usize>(),
            "duration search step"
        );
        Ok(())
    }

    /// Step until done, asking `scores` for the emissions of the current beams
    pub fn run<F>(&mut self, mut scores: F) -> Result<()>
    where
        F: FnMut(usize, &[BeamState]) -> Result<Array3<f32>>,
    {
        while !self.is_done() {
            let h = scores(self.num_steps(), &self.states)?;
            self.step(h.view())?;
        }
        Ok(())
    }

    /// Backtrack the best hypothesis of every batch element
    pub fn finish(&self) -> Result<Alignment> {
        let batch_size = self.batch_size();
        let beam_width = self.config().beam_width;
        let table = self.decoder.duration_table();
        let max_input = self.input_length.iter().copied().max().unwrap_or(0).max(0) as usize;

        let mut best_branch = Array1::zeros(batch_size);
        let mut log_prob = Array1::zeros(batch_size);
        let mut total_duration = Array1::zeros(batch_size);
        let mut duration_class =
            Array2::from_elem((batch_size, max_input), table.zero_duration_id() as i32);
        let mut durations = Array2::zeros((batch_size, max_input));

        for (b, state) in self.states.iter().enumerate() {
            let scores: Array1<f64> = state.beams().iter().map(|beam| beam.log_prob).collect();
            let finished: Array1<bool> = state.beams().iter().map(|beam| beam.is_finished).collect();
            let best = best_final_branch(scores.view(), finished.view())?;
            let beam = state.beams()[best as usize];

            let predictions = self.history.prediction(b);
            let (branch, t) = extract_best_beam_branch(
                best,
                self.history.beam_branch(b).view(),
                self.history.t_history(b).view(),
                beam_width,
            )?;

            // A step that moved `t` forward assigned a class to unit `t - 1`
            let mut previous_t = 0;
            for (k, (slot, t)) in branch.iter().zip(t.iter()).enumerate() {
                if *t > previous_t {
                    let class = predictions[[k, *slot as usize]];
                    let unit = (*t - 1) as usize;
                    duration_class[[b, unit]] = class;
                    durations[[b, unit]] = table.frames(class as usize);
                }
                previous_t = *t;
            }

            best_branch[b] = best;
            log_prob[b] = beam.log_prob;
            total_duration[b] = beam.total_duration;
        }

        let output_length = if self.config().test_mode {
            total_duration.clone()
        } else {
            self.output_length.clone()
        };
        let upsampled = upsample_with_config(
            durations.view().insert_axis(Axis(1)),
            output_length.view(),
            1,
            &UpsampleConfig::default(),
        )?;
        let source_indexes = upsampled.index_axis(Axis(1), 0).to_owned();

        info!(
            batch_size,
            steps = self.num_steps(),
            best_log_prob = log_prob.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            "duration search finished"
        );

        Ok(Alignment {
            best_branch,
            log_prob,
            total_duration,
            duration_class,
            durations,
            source_indexes,
        })
    }
}
