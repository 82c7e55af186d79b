//! Fetch stage: turns a request descriptor into decodable bytes.
//!
//! Resolution order, first match wins:
//!
//! ```text
//!   byte store hit ──────────────► Path(entry)
//!   absolute local path exists ──► Path(local)
//!   file:// or content:// URI ───► Uri(source)
//!   http(s):// URL ──────────────► download ──► Path(entry) | Memory(bytes)
//!   anything else ───────────────► InvalidSource
//! ```
//!
//! # Download Retry
//!
//! A non-200 status fails immediately. Transport errors (timeouts,
//! connection failures, a body that breaks off) are retried up to
//! `FetchConfig::attempts` times with a fixed backoff in between. If the
//! byte store fails while persisting a body, the store is bypassed for the
//! rest of the fetch: the URL is requested once more and the body kept in
//! memory, without spending an attempt.
//! Cancellation is observed before each attempt, while waiting for the
//! response, and during the backoff.

mod http;

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::request::{CacheKey, RequestDescriptor};
use crate::source::{FetchedSource, CONTENT_SCHEME, FILE_SCHEME};
use crate::store::{ByteStore, StoreError};

pub use http::{
    BodyReader, BoxFuture, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};

#[cfg(test)]
pub use http::tests::{MockReply, MockTransport};

/// Errors from the fetch stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    /// The server answered with something other than 200.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Every attempt failed at the transport or storage level.
    #[error("failed to fetch {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    /// The source is neither a local file nor a supported URI.
    #[error("invalid image source: {0}")]
    InvalidSource(String),
}

/// Failure while persisting a response body.
#[derive(Debug, Error)]
enum BodyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to read response body: {0}")]
    Read(#[from] io::Error),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Fetches image bytes from the store, the filesystem, or the network.
pub struct Fetcher {
    store: Arc<ByteStore>,
    transport: Arc<dyn HttpTransport>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(store: Arc<ByteStore>, transport: Arc<dyn HttpTransport>, config: FetchConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Locates the bytes for `descriptor`, downloading them if needed.
    pub async fn fetch(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<FetchedSource, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let key = descriptor.cache_key();
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.get(key)).await {
            Ok(Some(path)) => {
                debug!(key = %key, path = %path.display(), "Byte store hit");
                return Ok(FetchedSource::Path(path));
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Byte store lookup task failed"),
        }

        let source = descriptor.source();
        let local = Path::new(source);
        if local.is_absolute() && tokio::fs::metadata(local).await.is_ok() {
            return Ok(FetchedSource::Path(local.to_path_buf()));
        }

        let url = reqwest::Url::parse(source)
            .map_err(|_| FetchError::InvalidSource(source.to_string()))?;
        match url.scheme() {
            FILE_SCHEME | CONTENT_SCHEME => Ok(FetchedSource::Uri(source.to_string())),
            "http" | "https" => self.download(source, key, cancel).await,
            other => Err(FetchError::InvalidSource(format!(
                "unsupported scheme '{}' in {}",
                other, source
            ))),
        }
    }

    async fn download(
        &self,
        url: &str,
        key: CacheKey,
        cancel: &CancellationToken,
    ) -> Result<FetchedSource, FetchError> {
        let attempts = self.config.attempts.max(1);
        let mut persist = self.store.is_enabled();
        let mut last_error = String::new();
        let mut attempt = 1;

        while attempt <= attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.transport.get(url) => result,
            };

            match outcome {
                Ok(response) if response.status == 200 => {
                    match self.read_body(key, response.body, persist).await {
                        Ok(source) => {
                            debug!(url, attempt, persisted = persist, "Downloaded");
                            return Ok(source);
                        }
                        Err(BodyError::Store(e)) if e.is_storage_failure() => {
                            // The body is gone with the failed write; fetch it
                            // again straight into memory without spending an
                            // attempt.
                            warn!(url, error = %e, "Byte store unavailable, loading without caching");
                            persist = false;
                            continue;
                        }
                        Err(e) => {
                            debug!(url, attempt, error = %e, "Failed to read response body");
                            last_error = e.to_string();
                        }
                    }
                }
                Ok(response) => {
                    debug!(url, status = response.status, "Non-200 response, not retrying");
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(e) => {
                    debug!(url, attempt, attempts, error = %e, "Transport error");
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(self.config.backoff) => {}
                }
            }
            attempt += 1;
        }

        warn!(url, attempts, error = %last_error, "Download failed");
        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last: last_error,
        })
    }

    /// Streams the body into the store, or buffers it in memory when
    /// `persist` is false.
    async fn read_body(
        &self,
        key: CacheKey,
        mut body: BodyReader,
        persist: bool,
    ) -> Result<FetchedSource, BodyError> {
        if !persist {
            let mut buf = Vec::new();
            body.read_to_end(&mut buf).await?;
            return Ok(FetchedSource::Memory(Bytes::from(buf)));
        }

        let store = Arc::clone(&self.store);
        let mut reader = SyncIoBridge::new(body);
        let path = tokio::task::spawn_blocking(move || store.put(key, &mut reader)).await??;
        Ok(FetchedSource::Path(path))
    }
}
