//! Beam state and the pooled top-k selection shared by every decoder

use std::cmp::Ordering;

use ndarray::ArrayView1;
use tracing::trace;

use crate::error::{DecodeError, Result};

/// One hypothesis in the search
///
/// A beam has no identity beyond its slot index within a step; the slot's
/// origin is recovered through the parent pointers kept in
/// [`crate::history::BranchHistory`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    /// Cumulative log-probability of the path
    pub log_prob: f64,
    /// Encoder frame / source unit index
    pub t: i32,
    /// Output step index
    pub u: i32,
    pub is_finished: bool,
    /// Sum of realized durations (duration decoder only, 0 elsewhere)
    pub total_duration: i32,
}

impl Beam {
    pub fn initial() -> Self {
        Self {
            log_prob: 0.0,
            t: 0,
            u: 0,
            is_finished: false,
            total_duration: 0,
        }
    }

    /// This beam carried over unchanged into the next step
    pub fn frozen(self) -> Self {
        Self {
            is_finished: true,
            ..self
        }
    }
}

/// A successor hypothesis competing for a slot in the next step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Class chosen at this step (transition, duration class or tone)
    pub prediction: i32,
    pub beam: Beam,
    /// Slot of the originating beam in the previous step
    pub parent: usize,
}

impl Candidate {
    /// Frozen successor of a finished beam
    pub fn frozen(beam: Beam, parent: usize, padding_prediction: i32) -> Self {
        Self {
            prediction: padding_prediction,
            beam: beam.frozen(),
            parent,
        }
    }

    /// Same hypothesis regardless of where it came from
    fn same_hypothesis(&self, other: &Candidate) -> bool {
        self.prediction == other.prediction
            && self.beam.log_prob == other.beam.log_prob
            && self.beam.t == other.beam.t
            && self.beam.u == other.beam.u
            && self.beam.is_finished == other.beam.is_finished
            && self.beam.total_duration == other.beam.total_duration
    }
}

/// Total order used for pruning: score descending, then parent slot, then class
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.beam
        .log_prob
        .total_cmp(&a.beam.log_prob)
        .then(a.parent.cmp(&b.parent))
        .then(a.prediction.cmp(&b.prediction))
}

/// Keep the `beam_width` best distinct candidates.
///
/// Candidates describing the same hypothesis are merged, keeping the one with
/// the lowest parent slot. When fewer than `beam_width` distinct hypotheses
/// survive, the survivors are repeated in rank order so the output always has
/// exactly `beam_width` entries.
pub fn select_top_k(mut candidates: Vec<Candidate>, beam_width: usize) -> Vec<Candidate> {
    candidates.sort_by(rank);

    let mut selected: Vec<Candidate> = Vec::with_capacity(beam_width);
    for candidate in candidates.iter() {
        if selected.len() == beam_width {
            break;
        }
        if !selected.iter().any(|s| s.same_hypothesis(candidate)) {
            selected.push(*candidate);
        }
    }

    let distinct = selected.len();
    if distinct == 0 {
        return selected;
    }
    for i in 0..(beam_width - distinct) {
        selected.push(selected[i % distinct]);
    }

    trace!(
        pool = candidates.len(),
        distinct,
        best = selected[0].beam.log_prob,
        "pruned candidate pool"
    );
    selected
}

/// The beams of one utterance at one step
#[derive(Debug, Clone, PartialEq)]
pub struct BeamState {
    beams: Vec<Beam>,
}

impl BeamState {
    /// Fresh state at decode start
    pub fn initial(beam_width: usize) -> Self {
        Self {
            beams: vec![Beam::initial(); beam_width],
        }
    }

    pub fn from_beams(beams: Vec<Beam>) -> Self {
        Self { beams }
    }

    /// Gather one utterance's state from the per-field tensors
    pub fn from_arrays(
        log_prob: ArrayView1<f64>,
        is_finished: ArrayView1<bool>,
        t: ArrayView1<i32>,
        u: ArrayView1<i32>,
        total_duration: Option<ArrayView1<i32>>,
    ) -> Result<Self> {
        let width = log_prob.len();
        for (name, len) in [("is_finished", is_finished.len()), ("t", t.len()), ("u", u.len())] {
            if len != width {
                return Err(DecodeError::invalid_argument(format!(
                    "{} has {} beams, log_prob_history has {}",
                    name, len, width
                )));
            }
        }
        if let Some(total_duration) = total_duration.as_ref() {
            if total_duration.len() != width {
                return Err(DecodeError::invalid_argument(format!(
                    "total_duration has {} beams, log_prob_history has {}",
                    total_duration.len(),
                    width
                )));
            }
        }

        let mut beams = Vec::with_capacity(width);
        for w in 0..width {
            let beam = Beam {
                log_prob: log_prob[w],
                t: t[w],
                u: u[w],
                is_finished: is_finished[w],
                total_duration: total_duration.as_ref().map_or(0, |d| d[w]),
            };
            check_beam(&beam, w)?;
            beams.push(beam);
        }
        Ok(Self { beams })
    }

    /// State made of the selected candidates
    pub fn advance(candidates: &[Candidate]) -> Self {
        Self {
            beams: candidates.iter().map(|c| c.beam).collect(),
        }
    }

    pub fn beams(&self) -> &[Beam] {
        &self.beams
    }

    pub fn len(&self) -> usize {
        self.beams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    pub fn all_finished(&self) -> bool {
        self.beams.iter().all(|b| b.is_finished)
    }
}

/// `value + delta`, failing instead of wrapping
pub(crate) fn advance_by(value: i32, delta: i32, what: &str) -> Result<i32> {
    value.checked_add(delta).ok_or_else(|| {
        DecodeError::invalid_argument(format!("{} overflows i32 ({} + {})", what, value, delta))
    })
}

fn check_beam(beam: &Beam, slot: usize) -> Result<()> {
    if beam.log_prob.is_nan() {
        return Err(DecodeError::numeric_degenerate(format!(
            "log_prob_history[{}] is NaN",
            slot
        )));
    }
    if beam.log_prob > 0.0 {
        return Err(DecodeError::invalid_argument(format!(
            "log_prob_history[{}] is positive ({})",
            slot, beam.log_prob
        )));
    }
    if beam.t < 0 || beam.u < 0 {
        return Err(DecodeError::invalid_argument(format!(
            "beam {} has negative position (t={}, u={})",
            slot, beam.t, beam.u
        )));
    }
    // Every decoder moves a live beam's t or u by one per step
    if !beam.is_finished && (beam.t == i32::MAX || beam.u == i32::MAX) {
        return Err(DecodeError::invalid_argument(format!(
            "beam {} position cannot advance (t={}, u={})",
            slot, beam.t, beam.u
        )));
    }
    if beam.total_duration < 0 {
        return Err(DecodeError::invalid_argument(format!(
            "beam {} has negative total_duration {}",
            slot, beam.total_duration
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn candidate(prediction: i32, log_prob: f64, t: i32, parent: usize) -> Candidate {
        Candidate {
            prediction,
            beam: Beam {
                log_prob,
                t,
                ..Beam::initial()
            },
            parent,
        }
    }

    #[test]
    fn test_select_orders_by_score_then_parent() {
        let pool = vec![
            candidate(0, -2.0, 1, 0),
            candidate(1, -1.0, 2, 1),
            candidate(1, -1.0, 3, 0),
            candidate(0, -0.5, 4, 2),
        ];
        let selected = select_top_k(pool, 3);

        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].beam.t, 4);
        // Tie at -1.0 goes to the lower parent slot
        assert_eq!(selected[1].parent, 0);
        assert_eq!(selected[2].parent, 1);
    }

    #[test]
    fn test_negative_infinity_loses() {
        let pool = vec![
            candidate(0, f64::NEG_INFINITY, 1, 0),
            candidate(1, -50.0, 2, 1),
        ];
        let selected = select_top_k(pool, 1);
        assert_eq!(selected[0].beam.log_prob, -50.0);
    }

    #[test]
    fn test_duplicates_merged_and_padded() {
        // Three identical beams produce the same two hypotheses
        let pool = vec![
            candidate(0, -0.2, 1, 0),
            candidate(1, -1.6, 0, 0),
            candidate(0, -0.2, 1, 1),
            candidate(1, -1.6, 0, 1),
            candidate(0, -0.2, 1, 2),
            candidate(1, -1.6, 0, 2),
        ];
        let selected = select_top_k(pool, 3);

        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].parent, 0);
        assert_eq!(selected[1].parent, 0);
        assert_eq!(selected[1].prediction, 1);
        // Padding repeats the best survivor
        assert_eq!(selected[2], selected[0]);
    }

    #[test]
    fn test_state_from_arrays() {
        let state = BeamState::from_arrays(
            arr1(&[0.0, -1.0]).view(),
            arr1(&[false, true]).view(),
            arr1(&[0, 3]).view(),
            arr1(&[1, 2]).view(),
            None,
        )
        .unwrap();

        assert_eq!(state.len(), 2);
        assert!(state.beams()[1].is_finished);
        assert!(!state.all_finished());
    }

    #[test]
    fn test_state_rejects_bad_input() {
        let result = BeamState::from_arrays(
            arr1(&[0.0, -1.0]).view(),
            arr1(&[false]).view(),
            arr1(&[0, 0]).view(),
            arr1(&[0, 0]).view(),
            None,
        );
        assert!(matches!(result, Err(DecodeError::InvalidArgument(_))));

        let result = BeamState::from_arrays(
            arr1(&[f64::NAN]).view(),
            arr1(&[false]).view(),
            arr1(&[0]).view(),
            arr1(&[0]).view(),
            None,
        );
        assert!(matches!(result, Err(DecodeError::NumericDegenerate(_))));

        let result = BeamState::from_arrays(
            arr1(&[0.0]).view(),
            arr1(&[false]).view(),
            arr1(&[-1]).view(),
            arr1(&[0]).view(),
            None,
        );
        assert!(matches!(result, Err(DecodeError::InvalidArgument(_))));
    }

    #[test]
    fn test_state_rejects_positive_log_prob() {
        for bad in [0.5, f64::INFINITY] {
            let result = BeamState::from_arrays(
                arr1(&[bad, -1.0]).view(),
                arr1(&[false, false]).view(),
                arr1(&[0, 0]).view(),
                arr1(&[0, 0]).view(),
                None,
            );
            assert!(matches!(result, Err(DecodeError::InvalidArgument(_))));
        }

        // A dead beam is still a valid input
        let state = BeamState::from_arrays(
            arr1(&[f64::NEG_INFINITY]).view(),
            arr1(&[true]).view(),
            arr1(&[2]).view(),
            arr1(&[0]).view(),
            None,
        );
        assert!(state.is_ok());
    }

    #[test]
    fn test_state_rejects_positions_that_cannot_advance() {
        for (t, u) in [(i32::MAX, 0), (0, i32::MAX)] {
            let result = BeamState::from_arrays(
                arr1(&[0.0]).view(),
                arr1(&[false]).view(),
                arr1(&[t]).view(),
                arr1(&[u]).view(),
                None,
            );
            assert!(matches!(result, Err(DecodeError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_advance_by_reports_overflow() {
        assert_eq!(advance_by(3, 4, "u").unwrap(), 7);
        assert!(matches!(
            advance_by(i32::MAX, 1, "u"),
            Err(DecodeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rank_is_total_with_infinities() {
        let pool = vec![
            candidate(0, f64::NEG_INFINITY, 1, 0),
            candidate(1, -0.5, 2, 1),
            candidate(0, f64::NEG_INFINITY, 3, 2),
            candidate(1, -3.0, 4, 3),
        ];
        let selected = select_top_k(pool, 4);
        assert_eq!(selected[0].beam.log_prob, -0.5);
        assert_eq!(selected[1].beam.log_prob, -3.0);
        assert_eq!(selected[2].parent, 0);
        assert_eq!(selected[3].parent, 2);
    }
}
