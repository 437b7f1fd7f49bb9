use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const FILTER_ENV: &str = "RESTSYNC_LOG";
const DEFAULT_FILTER: &str = "restsync=info";

/// Directory for the daily log files: $XDG_DATA_HOME/restsync/logs
pub fn log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|dir| dir.join("restsync").join("logs"))
}

/// Install the global subscriber.
///
/// `watch` prints snapshots to stdout, so logs go to a daily file unless
/// `to_stderr` is set. The returned guard flushes the file writer on drop and
/// must be held until exit.
pub fn init(to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  if to_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to install logger: {}", e))?;
    return Ok(None);
  }

  let dir = log_dir().ok_or_else(|| eyre!("Could not determine data directory for logs"))?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "restsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(Some(guard))
}
