use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::warn;
use rusqlite::params;

use crate::aggregation::window::WindowBounds;
use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_timestamp, to_i64, to_u64},
    models::{Marker, MarkerScan, NewSample, RawSample, SampleBatch},
};

impl Database {
    /// Append samples to the staging table in one transaction.
    pub async fn stage_samples(&self, samples: &[NewSample]) -> Result<usize> {
        let records = samples.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO android_tmp
                        (machine_id, package_name, last_used, duration_seconds, execution_timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        record.entity_id,
                        record.label,
                        format_timestamp(&record.last_used),
                        to_i64(record.duration_secs)?,
                        format_timestamp(&record.observed_at),
                    ])
                    .with_context(|| "failed to stage sample")?;
                }
            }
            tx.commit().context("failed to commit staged samples")?;
            Ok(records.len())
        })
        .await
    }

    pub async fn count_samples(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM android_tmp", [], |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
    }

    /// Distinct execution markers, oldest first. Stored strings that denote
    /// the same instant collapse into one marker.
    pub async fn distinct_markers(&self) -> Result<MarkerScan> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT execution_timestamp
                 FROM android_tmp
                 ORDER BY execution_timestamp ASC",
            )?;
            let values = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read execution markers")?;

            let mut grouped: BTreeMap<NaiveDateTime, Vec<String>> = BTreeMap::new();
            let mut unparsable = Vec::new();
            for value in values {
                match parse_timestamp(&value, "execution_timestamp") {
                    Ok(at) => grouped.entry(at).or_default().push(value),
                    Err(_) => unparsable.push(value),
                }
            }

            Ok(MarkerScan {
                markers: grouped
                    .into_iter()
                    .map(|(at, stored)| Marker { at, stored })
                    .collect(),
                unparsable,
            })
        })
        .await
    }

    /// Samples tagged with `marker` whose `last_used` falls inside `window`.
    /// Rows with a malformed `last_used` or negative duration are skipped
    /// and counted.
    pub async fn samples_in_window(
        &self,
        marker: &Marker,
        window: WindowBounds,
    ) -> Result<SampleBatch> {
        let marker = marker.clone();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, machine_id, package_name, last_used, duration_seconds
                 FROM android_tmp
                 WHERE execution_timestamp = ?1
                 ORDER BY id ASC",
            )?;

            let mut batch = SampleBatch::default();
            for stored in &marker.stored {
                let mut rows = stmt.query(params![stored])?;
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let last_used_raw: String = row.get(3)?;
                    let parsed = parse_timestamp(&last_used_raw, "last_used").and_then(
                        |last_used| Ok((last_used, to_u64(row.get(4)?, "duration_seconds")?)),
                    );
                    let (last_used, duration_secs) = match parsed {
                        Ok(fields) => fields,
                        Err(err) => {
                            warn!("Skipping staged row {id}: {err:#}");
                            batch.rejected += 1;
                            continue;
                        }
                    };
                    if !window.contains(last_used) {
                        continue;
                    }
                    batch.samples.push(RawSample {
                        id,
                        entity_id: row.get(1)?,
                        label: row.get(2)?,
                        last_used,
                        duration_secs,
                        observed_at: marker.at,
                    });
                }
            }
            Ok(batch)
        })
        .await
    }

    /// Delete staged rows whose marker is strictly older than `cutoff`.
    /// Rows with an unparsable marker are left in place.
    pub async fn purge_samples_before(&self, cutoff: NaiveDateTime) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let stale: Vec<String> = {
                let mut stmt = tx.prepare("SELECT DISTINCT execution_timestamp FROM android_tmp")?;
                let values = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                values
                    .into_iter()
                    .filter(|value| {
                        parse_timestamp(value, "execution_timestamp")
                            .map(|at| at < cutoff)
                            .unwrap_or(false)
                    })
                    .collect()
            };

            let mut deleted = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM android_tmp WHERE execution_timestamp = ?1")?;
                for value in &stale {
                    deleted += stmt.execute(params![value])?;
                }
            }
            tx.commit().context("failed to commit staging purge")?;
            Ok(deleted)
        })
        .await
    }
}
