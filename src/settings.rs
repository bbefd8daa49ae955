use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

pub const SETTINGS_PATH_VAR: &str = "ACTIVOPS_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub lookback_minutes: u32,
    pub retention_hours: u32,
    pub busy_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("activops.sqlite3"),
            lookback_minutes: 10,
            retention_hours: 12,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    /// Defaults, then the JSON file named by `ACTIVOPS_SETTINGS`, then
    /// individual environment variables. A `.env` file in the working
    /// directory is loaded first.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let file = env::var_os(SETTINGS_PATH_VAR).map(PathBuf::from);
        Self::from_sources(file.as_deref(), |key| env::var(key).ok())
    }

    pub fn from_sources<F>(file: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match file {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };

        if let Some(path) = lookup("ACTIVOPS_DB_PATH").filter(|v| !v.trim().is_empty()) {
            settings.db_path = PathBuf::from(path);
        }
        if let Some(value) = parse_var(&lookup, "ACTIVOPS_LOOKBACK_MINUTES")? {
            settings.lookback_minutes = value;
        }
        if let Some(value) = parse_var(&lookup, "ACTIVOPS_RETENTION_HOURS")? {
            settings.retention_hours = value;
        }
        if let Some(value) = parse_var(&lookup, "ACTIVOPS_BUSY_TIMEOUT_MS")? {
            settings.busy_timeout_ms = value;
        }

        Ok(settings)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        None => Ok(None),
    }
}
