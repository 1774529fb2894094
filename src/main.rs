mod cache;
mod commands;
mod config;
mod country;
mod error;
mod logging;
mod resource;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tokio::runtime::Handle;

use crate::country::repository::CountryRepository;

#[derive(Parser, Debug)]
#[command(name = "countrydex")]
#[command(about = "Offline-first browser for world country reference data")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/countrydex/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror log output to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log_dir()?, args.verbose)?;
  tracing::debug!(?config, "Loaded configuration");

  let repo = CountryRepository::open(&config, Handle::current())?;
  commands::run(args.command, &repo, config.cache.default_policy).await
}
