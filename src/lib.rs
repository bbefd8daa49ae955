pub mod aggregation;
pub mod db;
pub mod settings;
mod utils;

use std::process::ExitCode;

use aggregation::{run_aggregation, AggregationConfig};
use db::Database;
use log::{debug, error, info};
use settings::Settings;

/// Batch entry point: aggregate staged Android usage, purge staging, and
/// report the outcome through the exit status.
pub fn run() -> ExitCode {
    utils::logging::init_logging();

    info!("activops usage aggregation starting...");

    let result = (|| -> anyhow::Result<u8> {
        let settings = Settings::load()?;
        let config = AggregationConfig::try_from(&settings)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let database = match Database::open(settings.db_path.clone(), settings.busy_timeout()) {
            Ok(database) => database,
            Err(err) => {
                error!("Database unavailable at {}: {err:#}", settings.db_path.display());
                return Ok(1);
            }
        };

        let report = runtime.block_on(run_aggregation(&database, &config));
        drop(database);

        info!("Run finished: {report}");
        match serde_json::to_string(&report) {
            Ok(json) => debug!("Run report: {json}"),
            Err(err) => debug!("Run report could not be serialized: {err}"),
        }
        Ok(report.exit_status())
    })();

    match result {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            error!("Startup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
