use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "countrydex.log";

/// Install the global subscriber.
///
/// Logs go to a daily-rolling file in `dir` so they never mix with command
/// output; `verbose` mirrors them to stderr. The filter comes from
/// `COUNTRYDEX_LOG`, then `RUST_LOG`, then defaults to `info`. Keep the
/// returned guard alive until exit or buffered lines are lost.
pub fn init(dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));

  let filter = EnvFilter::try_from_env("COUNTRYDEX_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false)))
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}
