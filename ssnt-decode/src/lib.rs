//! SSNT-TTS Beam Search Decoding
//!
//! Step-wise beam search over monotonic alignments between a source sequence
//! (phonemes, characters) and output frames.
//!
//! ## Features
//!
//! - Shift/emit beam search over an encoder lattice
//! - Duration-class beam search with teacher-forced or free-running length
//! - Tone-latent beam search
//! - Backtracking through recorded parent pointers
//! - Run-length expansion of durations into frame-level source indexes
//! - Batch parallelism via rayon
//!
//! ## Quick Start
//!
//! ```
//! use ndarray::{arr1, Array3};
//! use ssnt_decode::{DurationSearch, DurationSearchConfig, DurationTable};
//!
//! let table = DurationTable::new(vec![0, 1, 2], 0)?;
//! let config = DurationSearchConfig::with_table(table).beam_width(2);
//! let mut search = DurationSearch::new(config, arr1(&[2]), arr1(&[3]))?;
//!
//! search.run(|_, _| Ok(Array3::from_elem((1, 2, 3), (1.0_f32 / 3.0).ln())))?;
//! let alignment = search.finish()?;
//! assert_eq!(alignment.total_duration[0], 3);
//! # Ok::<(), ssnt_decode::DecodeError>(())
//! ```

pub mod beam;
pub mod branch;
pub mod config;
pub mod decoder; // Shift/emit (v1)
pub mod duration;
pub mod duration_decoder; // Duration classes (v2)
pub mod edit_distance;
pub mod error;
pub mod history;
pub mod session;
pub mod tone_decoder;
pub mod upsample;

pub use beam::{select_top_k, Beam, BeamState, Candidate};
pub use branch::{
    best_final_branch, extract_best_beam_branch, extract_best_beam_branch_batch,
    order_all_beam_branches, order_beam_branch,
};
pub use config::{
    BeamSearchConfig, DurationSearchConfig, ScoreScale, ToneSearchConfig, UpsampleConfig,
};
pub use decoder::{beam_search_decode, BeamSearchDecoder, BeamSearchStep, Transition};
pub use duration::DurationTable;
pub use duration_decoder::{
    ssnt_tts_v2_beam_search_decode, DurationBeamSearchDecoder, DurationBeamSearchStep,
};
pub use edit_distance::{levenshtein, levenshtein_edit_distance};
pub use error::{DecodeError, Result};
pub use history::BranchHistory;
pub use session::{Alignment, DurationSearch};
pub use tone_decoder::{tone_latent_beam_search_decode, ToneBeamSearchStep, ToneLatentDecoder};
pub use upsample::{upsample_source_indexes, upsample_with_config};

/// Default fill value for frames past the output length
pub const DEFAULT_OUT_OF_RANGE_SOURCE_INDEX: i32 = -1;
