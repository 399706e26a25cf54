//! Decoder configuration
//!
//! Each decoder takes a small config struct with builder-style setters and a
//! `validate()` pass that runs before any tensor is touched.

use serde::{Deserialize, Serialize};

use crate::duration::DurationTable;
use crate::error::{DecodeError, Result};

/// How emission scores in `h` are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// Raw probabilities in `[0, 1]`; the decoder takes `ln` itself
    Probability,
    /// Log-probabilities (`<= 0`), added to the history as is
    LogProbability,
}

impl ScoreScale {
    /// Convert one emission value to a log-probability contribution.
    ///
    /// A zero probability yields `-inf`, which is a legal score that loses to
    /// every finite one. NaN cannot be ordered and is rejected.
    pub fn log_score(self, value: f32) -> Result<f64> {
        if value.is_nan() {
            return Err(DecodeError::numeric_degenerate("emission score is NaN"));
        }
        match self {
            ScoreScale::Probability => {
                if !(0.0..=1.0).contains(&value) {
                    return Err(DecodeError::invalid_argument(format!(
                        "probability {} is outside [0, 1]",
                        value
                    )));
                }
                Ok(f64::from(value).ln())
            }
            ScoreScale::LogProbability => {
                if value > 0.0 {
                    return Err(DecodeError::invalid_argument(format!(
                        "log-probability {} is positive",
                        value
                    )));
                }
                Ok(f64::from(value))
            }
        }
    }
}

fn default_beam_width() -> usize {
    4
}

fn default_log_scale() -> ScoreScale {
    ScoreScale::LogProbability
}

fn default_true() -> bool {
    true
}

/// Configuration for the binary shift/emit decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamSearchConfig {
    /// Number of hypotheses kept after every step
    pub beam_width: usize,

    /// Number of encoder frames; a beam whose `t` reaches this is finished
    pub max_t: i32,

    /// Scale of `h` (default: probabilities)
    pub score_scale: ScoreScale,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            beam_width: default_beam_width(),
            max_t: 0,
            score_scale: ScoreScale::Probability,
        }
    }
}

impl BeamSearchConfig {
    pub fn new(beam_width: usize, max_t: i32) -> Self {
        Self {
            beam_width,
            max_t,
            ..Default::default()
        }
    }

    /// Set emission scale
    pub fn score_scale(mut self, scale: ScoreScale) -> Self {
        self.score_scale = scale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_width < 1 {
            return Err(DecodeError::invalid_argument("beam_width must be >= 1"));
        }
        if self.max_t < 0 {
            return Err(DecodeError::invalid_argument(format!(
                "max_t must be non-negative, got {}",
                self.max_t
            )));
        }
        Ok(())
    }
}

/// Configuration for the duration-aware decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSearchConfig {
    /// Number of hypotheses kept per batch element
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,

    /// Duration classes and the skip class
    pub duration_table: DurationTable,

    /// Whether the skip class may be selected
    #[serde(default = "default_true")]
    pub allow_skip: bool,

    /// Free-running inference: the target output length is ignored
    #[serde(default)]
    pub test_mode: bool,

    /// Scale of `h` (default: log-probabilities)
    #[serde(default = "default_log_scale")]
    pub score_scale: ScoreScale,

    /// Upper bound on a hypothesis' total duration in test mode
    #[serde(default)]
    pub max_total_duration: Option<i32>,

    /// Step budget for [`crate::session::DurationSearch`]
    #[serde(default)]
    pub max_steps: Option<usize>,
}

impl DurationSearchConfig {
    /// Create config with a duration table and defaults for everything else
    pub fn with_table(duration_table: DurationTable) -> Self {
        Self {
            beam_width: default_beam_width(),
            duration_table,
            allow_skip: true,
            test_mode: false,
            score_scale: default_log_scale(),
            max_total_duration: None,
            max_steps: None,
        }
    }

    /// Set beam width
    pub fn beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width;
        self
    }

    /// Allow or forbid the skip class
    pub fn allow_skip(mut self, allow_skip: bool) -> Self {
        self.allow_skip = allow_skip;
        self
    }

    /// Enable free-running inference mode
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Set emission scale
    pub fn score_scale(mut self, scale: ScoreScale) -> Self {
        self.score_scale = scale;
        self
    }

    /// Cap the total duration of a hypothesis (test mode only)
    pub fn max_total_duration(mut self, frames: Option<i32>) -> Self {
        self.max_total_duration = frames;
        self
    }

    /// Set the session step budget
    pub fn max_steps(mut self, steps: Option<usize>) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_width < 1 {
            return Err(DecodeError::invalid_argument("beam_width must be >= 1"));
        }
        self.duration_table.validate()?;
        if let Some(cap) = self.max_total_duration {
            if cap < 0 {
                return Err(DecodeError::invalid_argument(format!(
                    "max_total_duration must be non-negative, got {}",
                    cap
                )));
            }
        }
        if self.max_steps == Some(0) {
            return Err(DecodeError::invalid_argument("max_steps must be >= 1"));
        }
        Ok(())
    }
}

/// Configuration for the tone-latent decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSearchConfig {
    pub beam_width: usize,
    pub tone_class_size: usize,
    /// Prediction written for frozen (finished) beams
    pub empty_tone_id: i32,
    pub score_scale: ScoreScale,
}

impl Default for ToneSearchConfig {
    fn default() -> Self {
        Self {
            beam_width: default_beam_width(),
            tone_class_size: 0,
            empty_tone_id: 0,
            score_scale: default_log_scale(),
        }
    }
}

impl ToneSearchConfig {
    pub fn new(beam_width: usize, tone_class_size: usize, empty_tone_id: i32) -> Self {
        Self {
            beam_width,
            tone_class_size,
            empty_tone_id,
            ..Default::default()
        }
    }

    /// Set emission scale
    pub fn score_scale(mut self, scale: ScoreScale) -> Self {
        self.score_scale = scale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_width < 1 {
            return Err(DecodeError::invalid_argument("beam_width must be >= 1"));
        }
        if self.tone_class_size < 1 {
            return Err(DecodeError::invalid_argument("tone_class_size must be >= 1"));
        }
        if self.empty_tone_id < 0 || self.empty_tone_id as usize >= self.tone_class_size {
            return Err(DecodeError::out_of_range(format!(
                "empty_tone_id {} is not a class in 0..{}",
                self.empty_tone_id, self.tone_class_size
            )));
        }
        Ok(())
    }
}

/// Configuration for source-index upsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsampleConfig {
    /// Value written to frames past the output length
    pub out_of_range_source_index: i32,

    /// Reject rows whose duration sum differs from the output length
    pub strict: bool,
}

impl Default for UpsampleConfig {
    fn default() -> Self {
        Self {
            out_of_range_source_index: crate::DEFAULT_OUT_OF_RANGE_SOURCE_INDEX,
            strict: false,
        }
    }
}

impl UpsampleConfig {
    pub fn new(out_of_range_source_index: i32) -> Self {
        Self {
            out_of_range_source_index,
            ..Default::default()
        }
    }

    /// Require `sum(duration) == output_length` for every row
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}
