use crate::modules::logger::{parse_level, LocalTimer};
use crate::modules::settings::LoggerConfig;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub static LOG_WORKER_GUARD: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

pub fn setup_file_logger(
    config: &LoggerConfig,
) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let level = parse_level(&config.log_level);

    let (engine_nonb, engine_guard) = engine_log_writer(config);
    let _ = LOG_WORKER_GUARD.set(vec![engine_guard]);

    let engine_layer = fmt::layer()
        .with_timer(LocalTimer)
        .with_ansi(config.ansi_logs)
        .with_level(true)
        .with_writer(engine_nonb)
        .with_target(true);

    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(engine_layer);

    tracing::subscriber::set_global_default(subscriber)
}

fn engine_log_writer(config: &LoggerConfig) -> (NonBlocking, WorkerGuard) {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("engine")
        .max_log_files(config.max_log_files)
        .build(config.log_dir.clone())
        .expect("failed to initialize rolling file appender");
    let (nb, wg) = tracing_appender::non_blocking(rolling);
    (nb, wg)
}
