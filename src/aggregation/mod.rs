pub mod config;
pub mod runner;
pub mod window;

pub use config::AggregationConfig;
pub use runner::{run_aggregation, PurgeOutcome, RunReport};
pub use window::{plan_windows, WindowBounds};
