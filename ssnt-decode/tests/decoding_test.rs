//! Multi-step decoding properties
//!
//! Drives the step functions the way a model-side loop would and checks the
//! invariants that must hold across steps.

use ndarray::{Array1, Array2, Array3};
use ssnt_decode::{
    beam_search_decode, extract_best_beam_branch, ssnt_tts_v2_beam_search_decode,
    BeamSearchStep, DurationBeamSearchStep, DurationSearch, DurationSearchConfig, DurationTable,
};

/// Deterministic emit probability in (0, 1) for step `k`, slot `w`
fn emit_probability(k: usize, w: usize) -> f32 {
    ((k * 7 + w * 3) % 10 + 1) as f32 / 12.0
}

fn run_v1(beam_width: usize, max_t: i32, steps: usize) -> Vec<BeamSearchStep> {
    let mut log_prob = Array1::<f64>::zeros(beam_width);
    let mut finished = Array1::from_elem(beam_width, false);
    let mut t = Array1::<i32>::zeros(beam_width);
    let mut u = Array1::<i32>::zeros(beam_width);
    let mut history = Vec::with_capacity(steps);

    for k in 0..steps {
        let h = Array2::from_shape_fn((beam_width, 2), |(w, c)| {
            let emit = emit_probability(k, w);
            if c == 1 {
                emit
            } else {
                1.0 - emit
            }
        });
        let step = beam_search_decode(
            h.view(),
            log_prob.view(),
            finished.view(),
            t.view(),
            u.view(),
            max_t,
            beam_width,
        )
        .unwrap();
        log_prob = step.log_prob.clone();
        finished = step.is_finished.clone();
        t = step.next_t.clone();
        u = step.next_u.clone();
        history.push(step);
    }
    history
}

fn stack<F>(history: &[BeamSearchStep], beam_width: usize, field: F) -> Array2<i32>
where
    F: Fn(&BeamSearchStep, usize) -> i32,
{
    Array2::from_shape_fn((history.len(), beam_width), |(k, w)| field(&history[k], w))
}

#[test]
fn test_v1_is_deterministic() {
    let first = run_v1(3, 4, 10);
    let second = run_v1(3, 4, 10);
    assert_eq!(first, second);
}

#[test]
fn test_v1_beam_count_and_monotonic_scores() {
    let beam_width = 3;
    let history = run_v1(beam_width, 4, 12);

    for k in 0..history.len() {
        let step = &history[k];
        assert_eq!(step.log_prob.len(), beam_width);
        assert_eq!(step.beam_branch.len(), beam_width);

        for w in 0..beam_width {
            let parent = step.beam_branch[w] as usize;
            assert!(parent < beam_width);
            let parent_score = if k == 0 { 0.0 } else { history[k - 1].log_prob[parent] };
            assert!(step.log_prob[w] <= parent_score);
        }

        // Slot 0 always holds the best hypothesis
        for w in 1..beam_width {
            assert!(step.log_prob[0] >= step.log_prob[w]);
        }
    }
}

#[test]
fn test_v1_lineage_moves_one_lattice_step_at_a_time() {
    let beam_width = 3;
    let max_t = 4;
    let history = run_v1(beam_width, max_t, 12);

    let beam_branch = stack(&history, beam_width, |s, w| s.beam_branch[w]);
    let t_history = stack(&history, beam_width, |s, w| s.next_t[w]);
    let u_history = stack(&history, beam_width, |s, w| s.next_u[w]);

    for final_slot in 0..beam_width as i32 {
        let (branch, t) =
            extract_best_beam_branch(final_slot, beam_branch.view(), t_history.view(), beam_width)
                .unwrap();
        assert_eq!(branch.len(), history.len());
        assert_eq!(*branch.last().unwrap(), final_slot);

        let (mut prev_t, mut prev_u) = (0, 0);
        for (k, slot) in branch.iter().enumerate() {
            let (t_k, u_k) = (t[k], u_history[[k, *slot as usize]]);
            let moved = (t_k - prev_t, u_k - prev_u);
            let frozen = history[k].is_finished[*slot as usize] && moved == (0, 0);
            assert!(
                moved == (1, 0) || moved == (0, 1) || frozen,
                "step {} moved by {:?}",
                k,
                moved
            );
            assert!(t_k <= max_t);
            prev_t = t_k;
            prev_u = u_k;
        }
    }
}

#[test]
fn test_v1_finished_beams_are_frozen() {
    let beam_width = 2;
    let history = run_v1(beam_width, 2, 12);

    for k in 1..history.len() {
        for w in 0..beam_width {
            let parent = history[k].beam_branch[w] as usize;
            let prev = &history[k - 1];
            if prev.is_finished[parent] {
                assert_eq!(history[k].next_t[w], prev.next_t[parent]);
                assert_eq!(history[k].next_u[w], prev.next_u[parent]);
                assert_eq!(history[k].log_prob[w], prev.log_prob[parent]);
                assert!(history[k].is_finished[w]);
                assert_eq!(history[k].prediction[w], 0);
            }
        }
    }
}

fn run_v2(
    table: &[i32],
    input_length: &Array1<i32>,
    output_length: &Array1<i32>,
    beam_width: usize,
    test_mode: bool,
) -> Vec<DurationBeamSearchStep> {
    let batch_size = input_length.len();
    let classes = table.len();
    let table = Array1::from(table.to_vec());
    let shape = (batch_size, beam_width);
    let mut log_prob = Array2::<f64>::zeros(shape);
    let mut finished = Array2::from_elem(shape, false);
    let mut total = Array2::<i32>::zeros(shape);
    let mut t = Array2::<i32>::zeros(shape);
    let mut u = Array2::<i32>::zeros(shape);
    let mut history = Vec::new();

    let steps = input_length.iter().copied().max().unwrap_or(0) as usize;
    for k in 0..steps {
        let h = Array3::from_shape_fn((batch_size, beam_width, classes), |(b, w, c)| {
            let raw = ((k * 5 + w * 2 + c * 3 + b) % 7 + 1) as f32;
            -raw / 4.0
        });
        let step = ssnt_tts_v2_beam_search_decode(
            h.view(),
            log_prob.view(),
            finished.view(),
            total.view(),
            table.view(),
            t.view(),
            u.view(),
            input_length.view(),
            output_length.view(),
            beam_width,
            classes,
            0,
            true,
            test_mode,
        )
        .unwrap();
        log_prob = step.log_prob.clone();
        finished = step.next_is_finished.clone();
        total = step.next_total_duration.clone();
        t = step.next_t.clone();
        u = step.next_u.clone();
        history.push(step);
    }
    history
}

#[test]
fn test_v2_teacher_forced_beams_hit_output_length() {
    let input_length = Array1::from(vec![3, 4]);
    let output_length = Array1::from(vec![5, 6]);
    let history = run_v2(&[0, 1, 2, 3], &input_length, &output_length, 3, false);
    let last = history.last().unwrap();

    for b in 0..2 {
        for w in 0..3 {
            assert!(last.next_is_finished[[b, w]]);
            if last.log_prob[[b, w]].is_finite() {
                assert_eq!(last.next_total_duration[[b, w]], output_length[b]);
                assert_eq!(last.next_t[[b, w]], input_length[b]);
            }
        }
        assert!(last.log_prob[[b, 0]].is_finite());
    }
}

#[test]
fn test_v2_is_deterministic() {
    let input_length = Array1::from(vec![4, 2]);
    let output_length = Array1::from(vec![0, 0]);
    let first = run_v2(&[0, 1, 2], &input_length, &output_length, 4, true);
    let second = run_v2(&[0, 1, 2], &input_length, &output_length, 4, true);
    assert_eq!(first, second);
}

#[test]
fn test_session_alignment_covers_output() {
    let table = DurationTable::new(vec![0, 1, 2, 3], 0).unwrap();
    let config = DurationSearchConfig::with_table(table).beam_width(3);
    let input_length = Array1::from(vec![3, 2]);
    let output_length = Array1::from(vec![6, 3]);
    let mut search =
        DurationSearch::new(config, input_length.clone(), output_length.clone()).unwrap();

    search
        .run(|k, _| {
            Ok(Array3::from_shape_fn((2, 3, 4), |(b, w, c)| {
                -(((k + w + c * 2 + b) % 5) as f32 + 1.0) / 3.0
            }))
        })
        .unwrap();
    let alignment = search.finish().unwrap();

    for b in 0..2 {
        let frames: i32 = alignment.durations.row(b).sum();
        assert_eq!(frames, output_length[b]);
        assert_eq!(alignment.total_duration[b], output_length[b]);

        // Source indexes never decrease and stay inside the input
        let row = alignment.source_indexes.row(b);
        let valid: Vec<i32> = row.iter().copied().take(output_length[b] as usize).collect();
        assert!(valid.windows(2).all(|p| p[0] <= p[1]));
        assert!(valid.iter().all(|i| *i >= 0 && *i < input_length[b]));
        assert!(row.iter().skip(output_length[b] as usize).all(|i| *i == -1));
    }
}
