//! Logger setup for the batch entry point.
//!
//! Lines look like `2024-03-01 08:10:00 - INFO - [activops_lib::aggregation] ...`.
//! The default level is INFO; `RUST_LOG` overrides it.

use std::io::Write;

use chrono::Local;
use log::LevelFilter;

pub fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    // A second initialisation (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}
