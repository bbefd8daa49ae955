//! Staging-side records: what the collector writes into `android_tmp`.

use chrono::NaiveDateTime;

/// A sample about to be staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSample {
    pub entity_id: i64,
    pub label: String,
    pub last_used: NaiveDateTime,
    pub duration_secs: u64,
    pub observed_at: NaiveDateTime,
}

/// A staged sample read back with every field parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    pub id: i64,
    pub entity_id: i64,
    pub label: String,
    pub last_used: NaiveDateTime,
    pub duration_secs: u64,
    pub observed_at: NaiveDateTime,
}

/// One execution marker: a distinct `observed_at` instant together with the
/// stored strings that parse to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub at: NaiveDateTime,
    pub stored: Vec<String>,
}

/// Distinct markers found in staging, oldest first, plus the raw values that
/// could not be parsed.
#[derive(Debug, Clone, Default)]
pub struct MarkerScan {
    pub markers: Vec<Marker>,
    pub unparsable: Vec<String>,
}

/// Samples selected for one window, plus the number of rows dropped because
/// a field was malformed.
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    pub samples: Vec<RawSample>,
    pub rejected: usize,
}
