use chrono::NaiveDateTime;

use super::RawSample;

/// A staged sample copied into the usage store under its window end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageWindow {
    pub entity_id: i64,
    pub label: String,
    pub last_used: NaiveDateTime,
    pub duration_secs: u64,
    pub window_end: NaiveDateTime,
}

impl UsageWindow {
    pub fn from_sample(sample: &RawSample, window_end: NaiveDateTime) -> Self {
        Self {
            entity_id: sample.entity_id,
            label: sample.label.clone(),
            last_used: sample.last_used,
            duration_secs: sample.duration_secs,
            window_end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The ledger entry was claimed and this many rows were inserted.
    Committed(usize),
    /// Another pass already owns this window end.
    AlreadyCommitted,
}
