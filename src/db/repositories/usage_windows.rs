use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_timestamp, to_i64, to_u64},
    models::{CommitOutcome, UsageWindow},
};

impl Database {
    pub async fn count_windows_ending_at(&self, window_end: NaiveDateTime) -> Result<u64> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM android_usage WHERE timestamp = ?1",
                params![format_timestamp(&window_end)],
                |row| row.get(0),
            )?;
            to_u64(count, "count")
        })
        .await
    }

    pub async fn count_windows(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM android_usage", [], |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
    }

    /// Claim the ledger entry for `window_end` and insert `rows` in the same
    /// transaction. A primary-key conflict on the ledger means the window was
    /// already committed; nothing is written in that case.
    pub async fn commit_window(
        &self,
        window_end: NaiveDateTime,
        rows: Vec<UsageWindow>,
    ) -> Result<CommitOutcome> {
        self.execute(move |conn| {
            let window_end_str = format_timestamp(&window_end);
            let tx = conn
                .transaction()
                .context("failed to open window transaction")?;

            let claimed = tx.execute(
                "INSERT INTO android_usage_windows (window_end, row_count, committed_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    window_end_str,
                    to_i64(rows.len() as u64)?,
                    Utc::now().to_rfc3339(),
                ],
            );
            match claimed {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Ok(CommitOutcome::AlreadyCommitted);
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("failed to claim window ledger"))
                }
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO android_usage
                        (machine_id, application_id, last_used, duration_seconds, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for row in &rows {
                    stmt.execute(params![
                        row.entity_id,
                        row.label,
                        format_timestamp(&row.last_used),
                        to_i64(row.duration_secs)?,
                        window_end_str,
                    ])
                    .with_context(|| format!("failed to insert usage row for {}", row.label))?;
                }
            }

            tx.commit().context("failed to commit usage window")?;
            Ok(CommitOutcome::Committed(rows.len()))
        })
        .await
    }

    /// Latest `window_end` present in the usage store.
    pub async fn latest_window_end(&self) -> Result<Option<NaiveDateTime>> {
        self.execute(|conn| {
            let latest: Option<String> = conn
                .query_row("SELECT MAX(timestamp) FROM android_usage", [], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .optional()?
                .flatten();
            latest
                .map(|raw| parse_timestamp(&raw, "timestamp"))
                .transpose()
        })
        .await
    }

    pub async fn windows_ending_at(&self, window_end: NaiveDateTime) -> Result<Vec<UsageWindow>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT machine_id, application_id, last_used, duration_seconds
                 FROM android_usage
                 WHERE timestamp = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![format_timestamp(&window_end)])?;
            let mut windows = Vec::new();
            while let Some(row) = rows.next()? {
                windows.push(UsageWindow {
                    entity_id: row.get(0)?,
                    label: row.get(1)?,
                    last_used: parse_timestamp(&row.get::<_, String>(2)?, "last_used")?,
                    duration_secs: to_u64(row.get(3)?, "duration_seconds")?,
                    window_end,
                });
            }
            Ok(windows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{open_test_db, ts};

    fn usage(label: &str, last_used: &str, window_end: &str) -> UsageWindow {
        UsageWindow {
            entity_id: 1,
            label: label.to_string(),
            last_used: ts(last_used),
            duration_secs: 42,
            window_end: ts(window_end),
        }
    }

    #[tokio::test]
    async fn commit_inserts_rows_and_ledger() {
        let (_dir, db) = open_test_db();
        let end = ts("2024-03-01 08:10:00");

        let outcome = db
            .commit_window(
                end,
                vec![
                    usage("com.a", "2024-03-01 08:00:05", "2024-03-01 08:10:00"),
                    usage("com.b", "2024-03-01 08:00:40", "2024-03-01 08:10:00"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Committed(2));
        assert_eq!(db.count_windows_ending_at(end).await.unwrap(), 2);
        let stored = db.windows_ending_at(end).await.unwrap();
        assert_eq!(stored[0].label, "com.a");
        assert_eq!(stored[1].last_used, ts("2024-03-01 08:00:40"));
        assert_eq!(db.latest_window_end().await.unwrap(), Some(end));
    }

    #[tokio::test]
    async fn second_commit_for_same_end_is_rejected() {
        let (_dir, db) = open_test_db();
        let end = ts("2024-03-01 08:10:00");
        db.commit_window(end, vec![usage("com.a", "2024-03-01 08:01:00", "2024-03-01 08:10:00")])
            .await
            .unwrap();

        let outcome = db
            .commit_window(end, vec![usage("com.z", "2024-03-01 08:02:00", "2024-03-01 08:10:00")])
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::AlreadyCommitted);
        assert_eq!(db.count_windows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_window_end_is_none_when_empty() {
        let (_dir, db) = open_test_db();
        assert_eq!(db.latest_window_end().await.unwrap(), None);
        assert_eq!(db.count_windows().await.unwrap(), 0);
    }
}
