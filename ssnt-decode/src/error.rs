//! Error types for decoding operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Failures of a single decode call.
///
/// Every variant is raised during validation, before any output array is
/// built, so a failed call never leaves a partial result behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Shape or rank mismatch, `beam_width < 1`, negative durations, bad config
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Backtrack pointer or class id outside its valid range
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// A score that cannot be ordered (NaN)
    #[error("Numerically degenerate input: {0}")]
    NumericDegenerate(String),
}

impl DecodeError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn out_of_range<S: Into<String>>(msg: S) -> Self {
        Self::OutOfRange(msg.into())
    }

    pub fn numeric_degenerate<S: Into<String>>(msg: S) -> Self {
        Self::NumericDegenerate(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DecodeError::invalid_argument("beam_width must be >= 1");
        assert_eq!(err.to_string(), "Invalid argument: beam_width must be >= 1");

        let err = DecodeError::out_of_range("parent 7 at step 2");
        assert_eq!(err.to_string(), "Out of range: parent 7 at step 2");

        let err = DecodeError::numeric_degenerate("h[0][1] is NaN");
        assert!(matches!(err, DecodeError::NumericDegenerate(_)));
    }
}
