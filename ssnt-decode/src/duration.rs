//! Duration vocabulary for the duration-aware decoder

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// Maps a duration-class id to the number of output frames it occupies
///
/// `zero_duration_id` names the skip class: selecting it advances to the next
/// source unit without adding any frames, whatever its table entry says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationTable {
    durations: Vec<i32>,
    zero_duration_id: usize,
}

impl DurationTable {
    pub fn new(durations: Vec<i32>, zero_duration_id: usize) -> Result<Self> {
        let table = Self {
            durations,
            zero_duration_id,
        };
        table.validate()?;
        Ok(table)
    }

    /// Build a table from the raw op arguments, checking the class count
    pub fn from_raw(
        durations: &[i32],
        duration_class_size: usize,
        zero_duration_id: i32,
    ) -> Result<Self> {
        if durations.len() != duration_class_size {
            return Err(DecodeError::invalid_argument(format!(
                "duration_table has {} entries but duration_class_size is {}",
                durations.len(),
                duration_class_size
            )));
        }
        if zero_duration_id < 0 {
            return Err(DecodeError::out_of_range(format!(
                "zero_duration_id {} is negative",
                zero_duration_id
            )));
        }
        Self::new(durations.to_vec(), zero_duration_id as usize)
    }

    pub fn validate(&self) -> Result<()> {
        if self.durations.is_empty() {
            return Err(DecodeError::invalid_argument("duration_table is empty"));
        }
        if let Some((class, d)) = self.durations.iter().enumerate().find(|(_, d)| **d < 0) {
            return Err(DecodeError::invalid_argument(format!(
                "duration class {} has negative duration {}",
                class, d
            )));
        }
        if self.zero_duration_id >= self.durations.len() {
            return Err(DecodeError::out_of_range(format!(
                "zero_duration_id {} is not a class in 0..{}",
                self.zero_duration_id,
                self.durations.len()
            )));
        }
        Ok(())
    }

    /// Number of duration classes
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn zero_duration_id(&self) -> usize {
        self.zero_duration_id
    }

    pub fn is_skip(&self, class: usize) -> bool {
        class == self.zero_duration_id
    }

    /// Frames contributed by `class`
    pub fn frames(&self, class: usize) -> i32 {
        if self.is_skip(class) {
            0
        } else {
            self.durations[class]
        }
    }

    /// Largest number of frames any single class can contribute
    pub fn max_frames(&self) -> i32 {
        (0..self.len()).map(|c| self.frames(c)).max().unwrap_or(0)
    }

    /// Smallest number of frames a selectable class contributes
    pub fn min_frames(&self, allow_skip: bool) -> i32 {
        (0..self.len())
            .filter(|c| allow_skip || !self.is_skip(*c))
            .map(|c| self.frames(c))
            .min()
            .unwrap_or(0)
    }
}
