//! CLI error type.

use std::io;

use imageloader::config::ConfigError;
use imageloader::{LoadFailure, LoaderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start loader: {0}")]
    Loader(#[from] LoaderError),

    #[error("failed to initialize logging: {0}")]
    Logging(String),

    #[error("{failed} of {total} images failed to load")]
    LoadFailed { failed: usize, total: usize },

    #[error("{uri}: {failure}")]
    Source { uri: String, failure: LoadFailure },

    #[error("failed to encode statistics: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
