//! Tracing subscriber setup from the log settings in [`AppConfig`].

use crate::config::{AppConfig, LogFormat};
use anyhow::Result;
use std::{fs, io};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// File name prefix for the daily rolling files; the date is appended.
pub const LOG_FILE_PREFIX: &str = "boxed.log";

/// Install the global subscriber. The returned guard flushes the file
/// writer when dropped, so `main` keeps it alive until exit.
pub fn init(cfg: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.log_level)?,
    };
    let (writer, guard) = make_writer(cfg.log_path.as_deref())?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match cfg.log_format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Text => fmt::layer()
            .with_ansi(cfg.log_path.is_none())
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).try_init()?;
    Ok(guard)
}

/// Stdout, or a non-blocking daily rolling file under `log_path`.
fn make_writer(log_path: Option<&str>) -> io::Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    match log_path {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Ok((BoxMakeWriter::new(writer), Some(guard)))
        }
        None => Ok((BoxMakeWriter::new(io::stdout), None)),
    }
}
