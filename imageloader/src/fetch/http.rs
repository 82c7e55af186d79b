//! HTTP transport abstraction for testability.
//!
//! The fetcher only needs a status code and a streaming body. Keeping that
//! behind [`HttpTransport`] lets tests script responses (errors, hangs,
//! status codes) without a server.

use std::future::Future;
use std::io;
use std::pin::Pin;

use futures::TryStreamExt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::config::FetchConfig;

/// Boxed future returned by transport methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Streaming response body.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Response head plus body stream.
pub struct HttpResponse {
    pub status: u16,
    pub body: BodyReader,
}

impl HttpResponse {
    /// A response whose body is held in memory.
    pub fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: Box::new(io::Cursor::new(body.into())),
        }
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Transport-level failure (no usable response).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Failed { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// Performs HTTP GET requests.
pub trait HttpTransport: Send + Sync {
    /// Issues a GET for `url`.
    ///
    /// Any status code is a successful transport result; only the absence
    /// of a response is an error.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, TransportError>>;
}

/// Transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the connect and request timeouts from `config`.
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    TransportError::Failed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

            let status = response.status().as_u16();
            let stream = response.bytes_stream().map_err(io::Error::other);
            Ok(HttpResponse {
                status,
                body: Box::new(StreamReader::new(Box::pin(stream))),
            })
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    /// Scripted reply for [`MockTransport`].
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Ok(Vec<u8>),
        Status(u16),
        Timeout,
        /// Never completes.
        Hang,
    }

    /// Mock transport that replays a script, then repeats `fallback`.
    pub struct MockTransport {
        script: Mutex<VecDeque<MockReply>>,
        fallback: MockReply,
        calls: AtomicUsize,
    }

    impl MockTransport {
        pub fn always(reply: MockReply) -> Self {
            Self::scripted(Vec::new(), reply)
        }

        pub fn scripted(script: Vec<MockReply>, fallback: MockReply) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpTransport for MockTransport {
        fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            Box::pin(async move {
                match reply {
                    MockReply::Ok(body) => Ok(HttpResponse::from_bytes(200, body)),
                    MockReply::Status(code) => Ok(HttpResponse::from_bytes(code, Vec::new())),
                    MockReply::Timeout => Err(TransportError::Timeout {
                        url: url.to_string(),
                    }),
                    MockReply::Hang => std::future::pending().await,
                }
            })
        }
    }

    #[tokio::test]
    async fn test_mock_transport_script_then_fallback() {
        let mock = MockTransport::scripted(vec![MockReply::Timeout], MockReply::Ok(vec![1, 2, 3]));

        let first = mock.get("http://example.com/a").await;
        assert!(matches!(first, Err(TransportError::Timeout { .. })));

        let mut second = mock.get("http://example.com/a").await.unwrap();
        assert_eq!(second.status, 200);
        let mut body = Vec::new();
        second.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, vec![1, 2, 3]);
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new(&FetchConfig::default()).is_ok());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout {
            url: "http://example.com".to_string(),
        };
        assert_eq!(err.to_string(), "request to http://example.com timed out");
    }
}
