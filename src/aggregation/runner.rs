use std::fmt;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::{error, info, warn};
use serde::Serialize;

use crate::aggregation::{config::AggregationConfig, window::plan_windows};
use crate::db::{CommitOutcome, Database, UsageWindow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum PurgeOutcome {
    Purged { cutoff: NaiveDateTime, deleted: usize },
    Skipped,
    Failed { reason: String },
}

/// What one run did. Built up marker by marker, so a failed run still
/// reports the work committed before the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub markers_seen: usize,
    pub unparsable_markers: usize,
    pub windows_committed: usize,
    pub already_processed: usize,
    pub empty_markers: usize,
    pub rows_inserted: usize,
    pub rejected_rows: usize,
    pub aggregation_error: Option<String>,
    pub purge: PurgeOutcome,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            markers_seen: 0,
            unparsable_markers: 0,
            windows_committed: 0,
            already_processed: 0,
            empty_markers: 0,
            rows_inserted: 0,
            rejected_rows: 0,
            aggregation_error: None,
            purge: PurgeOutcome::Skipped,
        }
    }
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.aggregation_error.is_none() && !matches!(self.purge, PurgeOutcome::Failed { .. })
    }

    /// Process exit status for this run: 0 on success, 1 when aggregation or
    /// the purge failed.
    pub fn exit_status(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "markers={} committed={} already_processed={} empty={} rows={} rejected_rows={} unparsable_markers={}",
            self.markers_seen,
            self.windows_committed,
            self.already_processed,
            self.empty_markers,
            self.rows_inserted,
            self.rejected_rows,
            self.unparsable_markers,
        )?;
        match &self.purge {
            PurgeOutcome::Purged { cutoff, deleted } => {
                write!(f, " purged={deleted} before {cutoff}")?
            }
            PurgeOutcome::Skipped => write!(f, " purge=skipped")?,
            PurgeOutcome::Failed { .. } => write!(f, " purge=failed")?,
        }
        if self.aggregation_error.is_some() {
            write!(f, " aggregation=failed")?;
        }
        Ok(())
    }
}

/// Aggregate every staged marker, then purge staging. The purge runs even
/// when aggregation stopped on an error.
pub async fn run_aggregation(db: &Database, config: &AggregationConfig) -> RunReport {
    let mut report = RunReport::default();

    if let Err(err) = aggregate_markers(db, config, &mut report).await {
        error!("Aggregation failed, remaining markers abandoned: {err:#}");
        report.aggregation_error = Some(format!("{err:#}"));
    }

    report.purge = match purge_staging(db, config).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Staging purge failed: {err:#}");
            PurgeOutcome::Failed {
                reason: format!("{err:#}"),
            }
        }
    };

    report
}

async fn aggregate_markers(
    db: &Database,
    config: &AggregationConfig,
    report: &mut RunReport,
) -> Result<()> {
    let scan = db
        .distinct_markers()
        .await
        .context("failed to list execution markers")?;

    for raw in &scan.unparsable {
        warn!("Unexpected execution timestamp {raw:?}, skipping");
    }
    report.unparsable_markers = scan.unparsable.len();
    report.markers_seen = scan.markers.len();

    let instants: Vec<NaiveDateTime> = scan.markers.iter().map(|marker| marker.at).collect();
    let windows = plan_windows(&instants, config.lookback);

    for (marker, window) in scan.markers.iter().zip(windows) {
        if window.new_day {
            info!("New day, window starts at {}", window.start);
        }

        let existing = db
            .count_windows_ending_at(marker.at)
            .await
            .with_context(|| format!("failed to check window {}", marker.at))?;
        if existing > 0 {
            info!("{} already processed, no insertion", marker.at);
            report.already_processed += 1;
            continue;
        }

        let batch = db
            .samples_in_window(marker, window)
            .await
            .with_context(|| format!("failed to read samples for {}", marker.at))?;
        report.rejected_rows += batch.rejected;

        if batch.samples.is_empty() {
            info!("No active samples for {}", marker.at);
            report.empty_markers += 1;
            continue;
        }

        let rows: Vec<UsageWindow> = batch
            .samples
            .iter()
            .map(|sample| UsageWindow::from_sample(sample, window.end))
            .collect();

        match db
            .commit_window(window.end, rows)
            .await
            .with_context(|| format!("failed to commit window {}", marker.at))?
        {
            CommitOutcome::Committed(inserted) => {
                info!("Inserted {inserted} usage rows for {}", marker.at);
                report.windows_committed += 1;
                report.rows_inserted += inserted;
            }
            CommitOutcome::AlreadyCommitted => {
                warn!("{} was committed by another run, skipping", marker.at);
                report.already_processed += 1;
            }
        }
    }

    Ok(())
}

async fn purge_staging(db: &Database, config: &AggregationConfig) -> Result<PurgeOutcome> {
    let Some(latest) = db
        .latest_window_end()
        .await
        .context("failed to read latest window end")?
    else {
        info!("No usage rows yet, skipping purge");
        return Ok(PurgeOutcome::Skipped);
    };

    let cutoff = latest - config.retention;
    let deleted = db
        .purge_samples_before(cutoff)
        .await
        .with_context(|| format!("failed to purge staging before {cutoff}"))?;
    info!("Purged {deleted} staging rows observed before {cutoff}");

    Ok(PurgeOutcome::Purged { cutoff, deleted })
}
