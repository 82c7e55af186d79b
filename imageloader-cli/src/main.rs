//! imageloader CLI - load images and manage the on-disk cache.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use imageloader::config::{ConfigFile, LoaderConfig, StorageRoot};
use tracing::error;

use commands::cache::CacheAction;
use commands::load::LoadArgs;
use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "imageloader")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to an INI configuration file
    #[arg(short, long, global = true, env = "IMAGELOADER_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory (overrides the configuration file)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and decode one or more images
    Load(LoadArgs),
    /// Inspect or clear the disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = resolve_config(cli.config.as_deref(), cli.cache_dir)?;
    match cli.command {
        Commands::Load(args) => commands::load::run(config, args),
        Commands::Cache { action } => commands::cache::run(config, action),
    }
}

/// Builds the loader configuration: defaults, then the file, then flags.
fn resolve_config(
    path: Option<&std::path::Path>,
    cache_dir: Option<PathBuf>,
) -> Result<LoaderConfig, CliError> {
    let mut config = match path {
        Some(path) => ConfigFile::load(path)?.to_loader_config()?,
        None => LoaderConfig::default(),
    };
    if let Some(dir) = cache_dir {
        config.store.root = StorageRoot::fixed(dir);
    }
    Ok(config)
}
