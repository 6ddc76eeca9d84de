use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub const DEFAULT_FILTER: &str = "info";

/// Keeps the file writer flushing until the process ends.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// `--log-level` beats `RUST_LOG`, which beats the settings file.
pub fn resolve_filter(flag: Option<&str>, env: Option<&str>, settings: Option<&str>) -> String {
    [flag, env, settings]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|f| !f.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

pub fn init(flag: Option<&str>, settings: Option<&str>, log_file: Option<&Path>) -> Result<LogGuard> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = resolve_filter(flag, env.as_deref(), settings);
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter {:?}", directives))?;

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("log file {} has no file name", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("failed to install the log subscriber")?;

    Ok(LogGuard { _file: guard })
}
