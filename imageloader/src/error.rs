//! Error types surfaced by the loader.
//!
//! Components below the loader (store, fetcher, decoder) have their own error
//! enums. The loader folds each of them into a [`LoadError`], which is the
//! only error a listener ever sees. Cancellation is not an error: it is
//! delivered as its own [`LoadEvent`](crate::loader::LoadEvent).

use std::io;

use thiserror::Error;

use crate::decode::DecodeError;
use crate::fetch::FetchError;

/// Terminal failure of a load, as delivered to listeners.
///
/// Cheap to clone: every listener that joined the same in-flight task
/// receives its own copy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// A retryable failure (network hiccup, memory pressure) that persisted
    /// past its retry bound.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that retrying cannot fix: bad status code, unsupported or
    /// corrupt image data, malformed source.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The persistent cache could not be used.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Classification of a [`LoadError`] without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Storage,
}

impl LoadError {
    /// Returns the error's classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) | Self::Storage(msg) => msg,
        }
    }
}

impl From<FetchError> for LoadError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Exhausted { .. } => LoadError::Transient(err.to_string()),
            FetchError::Status { .. } | FetchError::InvalidSource(_) => {
                LoadError::Permanent(err.to_string())
            }
            // Callers handle cancellation before converting; keep the
            // mapping total anyway.
            FetchError::Cancelled => LoadError::Transient(err.to_string()),
        }
    }
}

impl From<DecodeError> for LoadError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Exhausted { .. } => LoadError::Transient(err.to_string()),
            DecodeError::Unreadable { .. } => LoadError::Storage(err.to_string()),
            DecodeError::Corrupt(_)
            | DecodeError::Unsupported(_)
            | DecodeError::NoContentResolver(_)
            | DecodeError::Cancelled => LoadError::Permanent(err.to_string()),
        }
    }
}

/// Why [`ImageLoader::load`](crate::loader::ImageLoader::load) produced no
/// image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("load cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] LoadError),
}

/// Errors raised while starting an [`ImageLoader`](crate::loader::ImageLoader).
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The worker runtime could not be created.
    #[error("failed to create worker runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The default HTTP transport could not be built.
    #[error("failed to create HTTP transport: {0}")]
    Transport(String),
}
