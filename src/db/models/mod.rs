pub mod sample;
pub mod usage_window;

pub use sample::{Marker, MarkerScan, NewSample, RawSample, SampleBatch};
pub use usage_window::{CommitOutcome, UsageWindow};
