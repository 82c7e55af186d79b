//! Cache management CLI commands.

use clap::Subcommand;
use imageloader::config::{format_size, LoaderConfig};
use imageloader::store::ByteStore;
use serde::Serialize;

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing all cached images
    Clear,
    /// Show disk cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Disk cache report printed by `cache stats --json`.
#[derive(Debug, Serialize)]
struct CacheReport {
    directory: String,
    enabled: bool,
    entries: u64,
    bytes: u64,
    capacity: String,
}

impl CacheReport {
    fn new(store: &ByteStore, capacity: impl ToString) -> Self {
        Self {
            directory: store.root().display().to_string(),
            enabled: store.is_enabled(),
            entries: store.entry_count(),
            bytes: store.size_bytes(),
            capacity: capacity.to_string(),
        }
    }
}

/// Run a cache subcommand.
///
/// Opens the store directly; no worker pool is started.
pub fn run(config: LoaderConfig, action: CacheAction) -> Result<(), CliError> {
    let root = config.store.root.resolve();
    let store = ByteStore::with_capacity(&root, config.store.capacity);

    match action {
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", root.display());
            let result = store.clear();
            println!(
                "Deleted {} files, freed {}",
                result.entries_evicted,
                format_size(result.bytes_freed)
            );
            Ok(())
        }
        CacheAction::Stats { json } => {
            if json {
                let report = CacheReport::new(&store, config.store.capacity);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Disk cache: {}", root.display());
                println!("  Enabled:  {}", store.is_enabled());
                println!("  Files:    {}", store.entry_count());
                println!("  Size:     {}", format_size(store.size_bytes()));
                println!("  Capacity: {}", config.store.capacity);
            }
            Ok(())
        }
    }
}
