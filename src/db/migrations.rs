use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use rusqlite::{params, Connection, Transaction};

use super::helpers::{format_timestamp, parse_timestamp};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    let script = match version {
        1 => include_str!("schemas/schema_v1.sql"),
        2 => include_str!("schemas/schema_v2.sql"),
        _ => bail!("unknown migration target version: {version}"),
    };
    tx.execute_batch(script)
        .with_context(|| format!("failed to execute schema_v{version}.sql"))?;

    if version == 2 {
        backfill_window_ledger(tx)?;
    }
    Ok(())
}

/// Rewrites pre-existing `android_usage.timestamp` values into the storage
/// format and records one ledger row per window end, so equality lookups on
/// the canonical string find windows written by older collectors.
fn backfill_window_ledger(tx: &Transaction<'_>) -> Result<()> {
    let groups: Vec<(String, i64)> = {
        let mut stmt = tx.prepare("SELECT timestamp, COUNT(*) FROM android_usage GROUP BY timestamp")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let collected = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        collected
    };

    let mut ledger: BTreeMap<String, i64> = BTreeMap::new();
    for (raw, count) in groups {
        let canonical = match parse_timestamp(&raw, "timestamp") {
            Ok(at) => format_timestamp(&at),
            Err(err) => {
                warn!("Usage window {raw:?} left out of the ledger: {err}");
                continue;
            }
        };
        if canonical != raw {
            tx.execute(
                "UPDATE android_usage SET timestamp = ?1 WHERE timestamp = ?2",
                params![canonical, raw],
            )
            .with_context(|| format!("failed to normalize usage window {raw:?}"))?;
        }
        *ledger.entry(canonical).or_default() += count;
    }

    let committed_at = Utc::now().to_rfc3339();
    for (window_end, row_count) in &ledger {
        tx.execute(
            "INSERT OR IGNORE INTO android_usage_windows (window_end, row_count, committed_at)
             VALUES (?1, ?2, ?3)",
            params![window_end, row_count, committed_at],
        )?;
    }
    if !ledger.is_empty() {
        info!("Backfilled {} window ledger entries", ledger.len());
    }
    Ok(())
}
