use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMsg {
    Run(Job),
    Stop,
}

/// The thread that owns the connection, and the queue feeding it.
struct Worker {
    queue: mpsc::Sender<WorkerMsg>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn submit(&self, job: Job) -> Result<()> {
        self.queue
            .send(WorkerMsg::Run(job))
            .map_err(|_| anyhow!("database worker is no longer running"))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        // A send error means the worker already exited; joining still reaps it.
        let _ = self.queue.send(WorkerMsg::Stop);
        if handle.join().is_err() {
            error!("Database worker panicked");
        }
    }
}

/// Handle to the SQLite store. A single worker thread owns the connection;
/// every statement runs there, one closure at a time. The connection is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn open(db_path: PathBuf, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (queue, inbox) = mpsc::channel::<WorkerMsg>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_path = db_path.clone();

        let handle = thread::Builder::new()
            .name("activops-db".into())
            .spawn(move || match open_connection(&thread_path, busy_timeout) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(conn, inbox);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        let ready = ready_rx
            .recv()
            .context("database worker exited before signaling readiness");
        if let Err(err) = ready.and_then(|init| init) {
            let _ = handle.join();
            return Err(err);
        }

        info!("Database opened at {}", db_path.display());
        Ok(Self {
            worker: Arc::new(Worker {
                queue,
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            // The caller may have given up waiting; the work is done either way.
            let _ = reply_tx.send(task(conn));
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the task without replying"))?
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
    conn.busy_timeout(busy_timeout)
        .context("failed to set busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL journal unavailable, keeping default journal mode: {err}");
    }
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, inbox: mpsc::Receiver<WorkerMsg>) {
    for msg in inbox {
        match msg {
            WorkerMsg::Run(job) => job(&mut conn),
            WorkerMsg::Stop => break,
        }
    }

    match conn.close() {
        Ok(()) => info!("Database connection closed"),
        Err((_, err)) => error!("Failed to close database connection: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_nested_path_and_runs_statements() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("activops.sqlite3");
        let db = Database::open(path.clone(), Duration::from_millis(500)).unwrap();

        assert!(path.exists());
        let answer: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT 40 + 2", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("db.sqlite3"), Duration::from_millis(500)).unwrap();

        let result: Result<()> = db
            .execute(|conn| {
                conn.execute("INSERT INTO missing_table VALUES (1)", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        // The worker survives a failed task.
        let one: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn dropping_last_handle_closes_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite3");

        let db = Database::open(path.clone(), Duration::from_millis(500)).unwrap();
        let clone = db.clone();
        drop(db);
        clone
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO android_usage (machine_id, application_id, last_used, duration_seconds, timestamp)
                     VALUES (1, 'com.a', '2024-03-01 08:05:00', 60, '2024-03-01 08:10:00')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        drop(clone);

        let reopened = Database::open(path, Duration::from_millis(500)).unwrap();
        assert_eq!(reopened.count_windows().await.unwrap(), 1);
    }

    #[test]
    fn open_reports_migration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.sqlite3");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        let err = Database::open(path, Duration::from_millis(500)).err().unwrap();
        assert!(format!("{err:#}").contains("newer than supported schema"));
    }
}
