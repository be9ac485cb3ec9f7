use crate::error::{DetectError, Result};
use serde::{Deserialize, Serialize};

/// Bounds of the sleep period in sample indices, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepPeriod {
    pub start: usize,
    pub end: usize,
    /// The raw bounds came out inverted and were swapped (no sleep stage found).
    pub reordered: bool,
}

impl SleepPeriod {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Reject periods that do not describe any sleep.
    pub fn validate(self) -> Result<Self> {
        if self.reordered {
            return Err(DetectError::DegenerateInput(format!(
                "no sleep stage in hypnogram (wake-trimmed bounds inverted to [{}, {}))",
                self.start, self.end
            )));
        }
        if self.is_empty() {
            return Err(DetectError::DegenerateInput(format!(
                "empty sleep period [{}, {})",
                self.start, self.end
            )));
        }
        Ok(self)
    }
}

/// Trim leading and trailing wake (`0`) from an aligned stage array.
///
/// Pure: never fails. Inverted bounds are swapped and flagged in
/// [`SleepPeriod::reordered`]; use [`SleepPeriod::validate`] before scanning.
pub fn trim_wake(stages: &[i32]) -> SleepPeriod {
    if stages.is_empty() {
        return SleepPeriod {
            start: 0,
            end: 0,
            reordered: false,
        };
    }
    let last = stages.len() - 1;
    let mut start = 0;
    while start != last && stages[start] == 0 {
        start += 1;
    }
    let mut end = stages.len();
    while end != 0 && stages[end - 1] == 0 {
        end -= 1;
    }
    if end <= start {
        return SleepPeriod {
            start: end,
            end: start,
            reordered: true,
        };
    }
    SleepPeriod {
        start,
        end,
        reordered: false,
    }
}
