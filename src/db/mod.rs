pub mod connection;
pub mod helpers;
pub mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{CommitOutcome, Marker, MarkerScan, NewSample, RawSample, SampleBatch, UsageWindow};
