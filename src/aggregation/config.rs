use anyhow::{bail, Result};
use chrono::Duration;

use crate::settings::Settings;

/// Tunables for one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// How far the first window of a day reaches back before its marker.
    pub lookback: Duration,

    /// Staging rows older than the latest window end minus this are purged.
    pub retention: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::minutes(10),
            retention: Duration::hours(12),
        }
    }
}

impl TryFrom<&Settings> for AggregationConfig {
    type Error = anyhow::Error;

    fn try_from(settings: &Settings) -> Result<Self> {
        if settings.lookback_minutes == 0 {
            bail!("lookback must be at least one minute");
        }
        if settings.retention_hours == 0 {
            bail!("retention must be at least one hour");
        }
        Ok(Self {
            lookback: Duration::minutes(i64::from(settings.lookback_minutes)),
            retention: Duration::hours(i64::from(settings.retention_hours)),
        })
    }
}
