// Copyright © 2026 mailbeam.dev
// Licensed under MailBeam License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::settings::LoggerConfig;
use chrono::Local;
use tracing::Level;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

mod file;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Install the global tracing subscriber. Call once, before the engine
/// is constructed; a second call returns an error from tracing.
pub fn initialize_logging(
    config: &LoggerConfig,
) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    if config.log_to_file {
        file::setup_file_logger(config)
    } else {
        setup_stdout_logger(config)
    }
}

fn setup_stdout_logger(
    config: &LoggerConfig,
) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let level = parse_level(&config.log_level);

    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(true)
        .with_timer(LocalTimer);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.ansi_logs)
        .with_writer(std::io::stdout)
        .event_format(format)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

fn parse_level(value: &str) -> Level {
    value.parse::<Level>().unwrap_or_else(|_| {
        eprintln!(
            "Invalid log level '{}'. Use one of: error, warn, info, debug, trace. Falling back to 'info'.",
            value
        );
        Level::INFO
    })
}
