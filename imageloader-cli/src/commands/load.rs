//! Load command - fetch and decode images through the loader.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use imageloader::config::{format_size, LoaderConfig};
use imageloader::loader::{ImageLoader, LoadEvent};
use imageloader::{LoadFailure, Orientation, RequestDescriptor};
use tracing::{info, warn};

use crate::error::CliError;

/// Arguments for the load command.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Image sources: http(s) URLs, file:// URIs or absolute paths
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Maximum decoded width in pixels (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    pub max_width: u32,

    /// Maximum decoded height in pixels (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    pub max_height: u32,

    /// Clockwise rotation in degrees (0, 90, 180 or 270)
    #[arg(long, default_value_t = 0)]
    pub rotate: i32,

    /// Print loader statistics as JSON when done
    #[arg(long)]
    pub stats: bool,
}

/// Outcome of one source, in submission order.
struct Outcome {
    index: usize,
    result: Result<(u32, u32, usize), LoadFailure>,
}

/// Run the load command.
pub fn run(config: LoaderConfig, args: LoadArgs) -> Result<(), CliError> {
    let loader = Arc::new(ImageLoader::start(config)?);
    info!(cache = %loader.cache_root().display(), "Loader started");

    {
        let loader = Arc::clone(&loader);
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("Interrupted, cancelling pending loads");
            loader.shutdown();
        }) {
            warn!(error = %e, "Could not install Ctrl-C handler");
        }
    }

    let orientation = Orientation::from_degrees(args.rotate);
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<Outcome>();

    for (index, source) in args.sources.iter().enumerate() {
        let descriptor = RequestDescriptor::new(source.as_str(), args.max_width, args.max_height)
            .with_orientation(orientation);
        let tx = tx.clone();
        let submission = loader.submit(descriptor, move |_: &RequestDescriptor, event: LoadEvent| {
            let result = match event {
                LoadEvent::Started => return,
                LoadEvent::Succeeded(image) => {
                    Ok((image.width(), image.height(), image.byte_len()))
                }
                LoadEvent::Failed(e) => Err(LoadFailure::Failed(e)),
                LoadEvent::Cancelled => Err(LoadFailure::Cancelled),
            };
            let _ = tx.send(Outcome { index, result });
        });
        info!(source = %source, submission = ?submission, "Submitted");
    }
    drop(tx);

    let mut results: Vec<Option<Result<(u32, u32, usize), LoadFailure>>> =
        args.sources.iter().map(|_| None).collect();
    for outcome in rx.iter().take(args.sources.len()) {
        results[outcome.index] = Some(outcome.result);
    }

    let mut failed = 0;
    for (source, result) in args.sources.iter().zip(results) {
        match result {
            Some(Ok((width, height, bytes))) => {
                println!("{}: {}x{} ({})", source, width, height, format_size(bytes as u64));
            }
            Some(Err(failure)) => {
                failed += 1;
                let err = CliError::Source {
                    uri: source.clone(),
                    failure,
                };
                eprintln!("{}", err);
            }
            None => {
                failed += 1;
                eprintln!("{}: no result", source);
            }
        }
    }

    let stats = loader.stats();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        memory_hits = stats.memory_hits,
        joined = stats.joined,
        disk_entries = stats.disk_entries,
        "Load finished"
    );
    if args.stats {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    loader.shutdown();

    if failed > 0 {
        return Err(CliError::LoadFailed {
            failed,
            total: args.sources.len(),
        });
    }
    Ok(())
}
