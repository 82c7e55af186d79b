//! Load coordinator.
//!
//! [`ImageLoader`] is the entry point: it deduplicates concurrent requests
//! for the same cache key, runs fetch and decode on its worker pool, keeps
//! decoded images in a bounded memory cache, and reports progress to
//! listeners.
//!
//! # Request Lifecycle
//!
//! ```text
//!              submit(descriptor, listener)
//!                          │
//!          ┌───────────────┼───────────────────┐
//!          ▼               ▼                   ▼
//!     memory hit      key in flight        new task
//!   Succeeded now     join (no event)    Started now
//!                          │                   │
//!                          └─────────┬─────────┘
//!                                    ▼
//!                     pool slot ─► fetch ─► decode
//!                                    │
//!            ┌───────────────────────┼──────────────────────┐
//!            ▼                       ▼                      ▼
//!   Succeeded to all joiners   Failed to all joiners   Cancelled to all
//!   (and memory cache insert)
//! ```
//!
//! # Locking
//!
//! The in-flight table sits behind one mutex. It is never held across I/O,
//! decoding, or listener callbacks. A successful result is inserted into the
//! memory cache while that mutex is held, so a concurrent `submit` either
//! sees the key in flight or sees the cached image.
//!
//! # Cancellation
//!
//! `cancel` removes the record at once and notifies its joiners. The task
//! observes the token at its next suspension point. If it completes anyway,
//! its image is still cached but nobody is notified a second time.

mod event;
mod inflight;
mod pool;
mod stats;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::LoaderConfig;
use crate::decode::{DecodeBackend, DecodeError, DecodedImage, Decoder, ImageCrateBackend};
use crate::error::{LoadError, LoadFailure, LoaderError};
use crate::fetch::{FetchError, Fetcher, HttpTransport, ReqwestTransport};
use crate::request::{CacheKey, RequestDescriptor};
use crate::source::ContentResolver;
use crate::store::{ByteStore, EvictionResult};

pub use event::{ChannelListener, LoadEvent, LoadListener, Submission};
pub use stats::{LoaderStats, StatsSnapshot};

use inflight::{InFlightTable, Joiner, TaskTicket};
use pool::WorkerPool;

/// Terminal result of a task body.
enum TaskOutcome {
    Succeeded(Arc<DecodedImage>),
    Failed(LoadError),
    Cancelled,
}

/// What `submit` decided while holding the lock.
enum Admission {
    Rejected(Joiner),
    Hit(Joiner, Arc<DecodedImage>),
    Joined,
    Begun(TaskTicket),
}

struct LoaderInner {
    inflight: Mutex<InFlightTable>,
    memory: Cache<CacheKey, Arc<DecodedImage>>,
    fetcher: Fetcher,
    decoder: Decoder,
    store: Arc<ByteStore>,
    pool: WorkerPool,
    stats: LoaderStats,
}

/// Builder for an [`ImageLoader`] with custom collaborators.
pub struct ImageLoaderBuilder {
    config: LoaderConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    backend: Option<Arc<dyn DecodeBackend>>,
    resolver: Option<Arc<dyn ContentResolver>>,
}

impl ImageLoaderBuilder {
    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the default `image` crate backend.
    pub fn backend(mut self, backend: Arc<dyn DecodeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Installs a resolver for `content://` sources.
    pub fn content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Opens the byte store, starts the worker pool, and returns the loader.
    pub fn build(self) -> Result<ImageLoader, LoaderError> {
        let config = self.config;

        let root = config.store.root.resolve();
        let store = Arc::new(ByteStore::with_capacity(root, config.store.capacity));

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(&config.fetch)
                    .map_err(|e| LoaderError::Transport(e.to_string()))?,
            ),
        };
        let backend: Arc<dyn DecodeBackend> = self
            .backend
            .unwrap_or_else(|| Arc::new(ImageCrateBackend::new(&config.decode)));

        let pool = WorkerPool::new(&config.pool).map_err(LoaderError::Runtime)?;
        let memory = Cache::builder()
            .max_capacity(config.memory_entries.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        let inner = LoaderInner {
            inflight: Mutex::new(InFlightTable::new()),
            memory,
            fetcher: Fetcher::new(Arc::clone(&store), transport, config.fetch.clone()),
            decoder: Decoder::new(backend, self.resolver, config.decode.clone()),
            store,
            pool,
            stats: LoaderStats::new(),
        };

        info!(
            cache_root = %inner.store.root().display(),
            memory_entries = config.memory_entries.max_entries,
            "Image loader started"
        );
        Ok(ImageLoader {
            inner: Arc::new(inner),
        })
    }
}

/// Deduplicating, cancellable image loader.
///
/// Dropping the loader shuts it down.
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl ImageLoader {
    /// Starts a loader with the default transport and backend.
    pub fn start(config: LoaderConfig) -> Result<Self, LoaderError> {
        Self::builder(config).build()
    }

    pub fn builder(config: LoaderConfig) -> ImageLoaderBuilder {
        ImageLoaderBuilder {
            config,
            transport: None,
            backend: None,
            resolver: None,
        }
    }

    /// Requests an image.
    ///
    /// A memory hit delivers `Succeeded` before returning. A new task
    /// delivers `Started` before returning; the terminal event follows from
    /// a worker. Joining an in-flight task delivers nothing until that task
    /// finishes.
    pub fn submit(&self, descriptor: RequestDescriptor, listener: impl LoadListener) -> Submission {
        self.submit_shared(descriptor, Arc::new(listener))
    }

    /// Like [`submit`](Self::submit) with a shared listener.
    pub fn submit_shared(
        &self,
        descriptor: RequestDescriptor,
        listener: Arc<dyn LoadListener>,
    ) -> Submission {
        let inner = &self.inner;
        inner.stats.record_submitted();
        let key = descriptor.cache_key();

        if let Some(image) = inner.memory.get(&key) {
            inner.stats.record_memory_hit();
            notify(&listener, &descriptor, LoadEvent::Succeeded(image));
            return Submission::CacheHit;
        }

        let first_listener = Arc::clone(&listener);
        let joiner = Joiner::new(descriptor.clone(), listener);
        let admission = {
            let mut table = inner.inflight.lock();
            if !table.is_accepting() {
                Admission::Rejected(joiner)
            } else if let Some(image) = inner.memory.get(&key) {
                // Completed between the first lookup and taking the lock.
                Admission::Hit(joiner, image)
            } else {
                match table.join(key, joiner) {
                    Ok(()) => Admission::Joined,
                    Err(joiner) => Admission::Begun(table.begin(key, joiner)),
                }
            }
        };

        match admission {
            Admission::Rejected(joiner) => {
                inner.stats.record_rejected();
                inner.stats.record_cancelled();
                debug!(key = %key, "Loader shut down, rejecting request");
                notify(&joiner.listener, &joiner.descriptor, LoadEvent::Cancelled);
                Submission::Rejected
            }
            Admission::Hit(joiner, image) => {
                inner.stats.record_memory_hit();
                notify(&joiner.listener, &joiner.descriptor, LoadEvent::Succeeded(image));
                Submission::CacheHit
            }
            Admission::Joined => {
                inner.stats.record_joined();
                debug!(key = %key, "Joined in-flight task");
                Submission::Joined
            }
            Admission::Begun(ticket) => {
                inner.stats.record_started();
                debug!(key = %key, source = descriptor.source(), "Load started");
                notify(&first_listener, &descriptor, LoadEvent::Started);
                inner
                    .pool
                    .spawn(run_task(Arc::clone(&self.inner), descriptor, ticket));
                Submission::Started
            }
        }
    }

    /// Cancels the in-flight task for the descriptor's cache key.
    ///
    /// Every joiner is notified `Cancelled`. Returns false if nothing was in
    /// flight for the key.
    pub fn cancel(&self, descriptor: &RequestDescriptor) -> bool {
        let key = descriptor.cache_key();
        let joiners = self.inner.inflight.lock().remove(key);
        match joiners {
            Some(joiners) => {
                debug!(key = %key, joiners = joiners.len(), "Cancelled in-flight task");
                for joiner in joiners {
                    self.inner.stats.record_cancelled();
                    notify(&joiner.listener, &joiner.descriptor, LoadEvent::Cancelled);
                }
                true
            }
            None => false,
        }
    }

    /// Looks up a decoded image in the memory cache.
    pub fn find_cached(&self, descriptor: &RequestDescriptor) -> Option<Arc<DecodedImage>> {
        self.inner.memory.get(&descriptor.cache_key())
    }

    /// Returns true if a task is in flight for the descriptor's key.
    pub fn is_in_flight(&self, descriptor: &RequestDescriptor) -> bool {
        self.inner.inflight.lock().contains(descriptor.cache_key())
    }

    /// Loads one image and waits for the outcome.
    pub async fn load(&self, descriptor: RequestDescriptor) -> Result<Arc<DecodedImage>, LoadFailure> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.submit(descriptor, move |_: &RequestDescriptor, event: LoadEvent| {
            let result = match event {
                LoadEvent::Started => return,
                LoadEvent::Succeeded(image) => Ok(image),
                LoadEvent::Failed(err) => Err(LoadFailure::Failed(err)),
                LoadEvent::Cancelled => Err(LoadFailure::Cancelled),
            };
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(result);
            }
        });
        rx.await.unwrap_or(Err(LoadFailure::Cancelled))
    }

    /// Drops every decoded image held in memory.
    pub fn clear_memory_cache(&self) {
        self.inner.memory.invalidate_all();
        self.inner.memory.run_pending_tasks();
    }

    /// Deletes every byte store entry. Blocks on disk I/O.
    pub fn clear_disk_cache(&self) -> EvictionResult {
        self.inner.store.clear()
    }

    /// Directory of the byte store.
    pub fn cache_root(&self) -> &Path {
        self.inner.store.root()
    }

    /// Counters plus current cache occupancy.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.memory.run_pending_tasks();
        let mut snapshot = self.inner.stats.snapshot();
        snapshot.memory_entries = self.inner.memory.entry_count();
        snapshot.disk_entries = self.inner.store.entry_count();
        snapshot.disk_bytes = self.inner.store.size_bytes();
        snapshot
    }

    /// Cancels everything in flight and stops the worker pool.
    ///
    /// Joiners of cancelled tasks are notified `Cancelled`; later submissions
    /// are rejected. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let joiners = {
            let mut table = self.inner.inflight.lock();
            if !table.is_accepting() {
                return;
            }
            table.stop_accepting();
            table.drain()
        };

        for joiner in &joiners {
            self.inner.stats.record_cancelled();
            notify(&joiner.listener, &joiner.descriptor, LoadEvent::Cancelled);
        }
        self.inner.pool.shutdown();
        info!(cancelled = joiners.len(), "Image loader shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        !self.inner.inflight.lock().is_accepting()
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Delivers one event, containing a panicking listener.
fn notify(listener: &Arc<dyn LoadListener>, descriptor: &RequestDescriptor, event: LoadEvent) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(descriptor, event)));
    if result.is_err() {
        warn!(source = descriptor.source(), "Load listener panicked");
    }
}

async fn run_task(inner: Arc<LoaderInner>, descriptor: RequestDescriptor, ticket: TaskTicket) {
    let key = descriptor.cache_key();
    let outcome = AssertUnwindSafe(inner.execute(&descriptor, &ticket.cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(key = %key, reason = %reason, "Load task panicked");
            TaskOutcome::Failed(LoadError::Permanent(format!("load task panicked: {}", reason)))
        });
    inner.complete(key, ticket.generation, outcome);
}

impl LoaderInner {
    #[instrument(skip_all, fields(key = %descriptor.cache_key(), source = descriptor.source()))]
    async fn execute(&self, descriptor: &RequestDescriptor, cancel: &CancellationToken) -> TaskOutcome {
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskOutcome::Cancelled,
            slot = self.pool.acquire() => match slot {
                Ok(slot) => slot,
                Err(_) => return TaskOutcome::Cancelled,
            },
        };

        let source = match self.fetcher.fetch(descriptor, cancel).await {
            Ok(source) => source,
            Err(FetchError::Cancelled) => return TaskOutcome::Cancelled,
            Err(e) => return TaskOutcome::Failed(e.into()),
        };

        match self.decoder.decode(source, descriptor, cancel).await {
            Ok(image) => {
                debug!(width = image.width(), height = image.height(), "Decoded");
                TaskOutcome::Succeeded(Arc::new(image))
            }
            Err(DecodeError::Cancelled) => TaskOutcome::Cancelled,
            Err(e) => TaskOutcome::Failed(e.into()),
        }
    }

    fn complete(&self, key: CacheKey, generation: u64, outcome: TaskOutcome) {
        let joiners = {
            let mut table = self.inflight.lock();
            if let TaskOutcome::Succeeded(image) = &outcome {
                self.memory.insert(key, Arc::clone(image));
            }
            table.finish(key, generation)
        };

        let Some(joiners) = joiners else {
            self.stats.record_superseded();
            debug!(key = %key, generation, "Task superseded, suppressing notifications");
            return;
        };

        match outcome {
            TaskOutcome::Succeeded(image) => {
                self.stats.record_succeeded();
                for joiner in &joiners {
                    notify(
                        &joiner.listener,
                        &joiner.descriptor,
                        LoadEvent::Succeeded(Arc::clone(&image)),
                    );
                }
            }
            TaskOutcome::Failed(err) => {
                self.stats.record_failed();
                warn!(key = %key, error = %err, joiners = joiners.len(), "Load failed");
                for joiner in &joiners {
                    notify(&joiner.listener, &joiner.descriptor, LoadEvent::Failed(err.clone()));
                }
            }
            TaskOutcome::Cancelled => {
                debug!(key = %key, "Load cancelled");
                for joiner in &joiners {
                    self.stats.record_cancelled();
                    notify(&joiner.listener, &joiner.descriptor, LoadEvent::Cancelled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, PoolConfig, StorageRoot};
    use crate::decode::png_bytes;
    use crate::error::ErrorKind;
    use crate::fetch::{BoxFuture, HttpResponse, MockReply, MockTransport, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    /// Transport that holds every request until a permit is released.
    struct GateTransport {
        gate: Arc<tokio::sync::Semaphore>,
        body: Vec<u8>,
        calls: AtomicUsize,
    }

    impl GateTransport {
        fn new(body: Vec<u8>) -> Self {
            Self {
                gate: Arc::new(tokio::sync::Semaphore::new(0)),
                body,
                calls: AtomicUsize::new(0),
            }
        }

        fn open(&self) {
            self.gate.add_permits(1_000);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpTransport for GateTransport {
        fn get<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let _permit = self.gate.acquire().await;
                Ok(HttpResponse::from_bytes(200, self.body.clone()))
            })
        }
    }

    fn config(temp: &TempDir) -> LoaderConfig {
        LoaderConfig::with_cache_root(StorageRoot::fixed(temp.path().join("image")))
            .with_pool(PoolConfig::new(2, 4))
            .with_fetch(FetchConfig::default().with_backoff(Duration::from_millis(10)))
    }

    fn loader_with(temp: &TempDir, transport: Arc<dyn HttpTransport>) -> ImageLoader {
        ImageLoader::builder(config(temp))
            .transport(transport)
            .build()
            .unwrap()
    }

    /// Listener that forwards `(tag, event)` into a std channel.
    fn tagged(tag: &'static str, tx: &mpsc::Sender<(&'static str, LoadEvent)>) -> impl LoadListener {
        let tx = Mutex::new(tx.clone());
        move |_: &RequestDescriptor, event: LoadEvent| {
            let _ = tx.lock().send((tag, event));
        }
    }

    #[test]
    fn test_success_then_memory_hit() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::always(MockReply::Ok(png_bytes(64, 32))));
        let loader = loader_with(&temp, mock.clone());
        let descriptor = RequestDescriptor::new("http://example.com/a.png", 100, 100);
        let (tx, rx) = mpsc::channel();

        assert_eq!(loader.submit(descriptor.clone(), tagged("a", &tx)), Submission::Started);
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("a", LoadEvent::Started)));
        match rx.recv_timeout(WAIT).unwrap() {
            ("a", LoadEvent::Succeeded(image)) => assert_eq!(image.width(), 64),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(loader.find_cached(&descriptor).is_some());
        assert_eq!(loader.submit(descriptor.clone(), tagged("b", &tx)), Submission::CacheHit);
        assert!(matches!(rx.try_recv().unwrap(), ("b", LoadEvent::Succeeded(_))));
        assert_eq!(mock.calls(), 1);

        let stats = loader.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.disk_entries, 1);
    }

    #[test]
    fn test_identical_requests_share_one_fetch() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(GateTransport::new(png_bytes(10, 10)));
        let loader = loader_with(&temp, gate.clone());
        let descriptor = RequestDescriptor::new("http://example.com/shared.png", 50, 50);
        let (tx, rx) = mpsc::channel();

        assert_eq!(loader.submit(descriptor.clone(), tagged("first", &tx)), Submission::Started);
        assert_eq!(loader.submit(descriptor.clone(), tagged("second", &tx)), Submission::Joined);
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("first", LoadEvent::Started)));

        gate.open();

        let mut order = Vec::new();
        for _ in 0..2 {
            match rx.recv_timeout(WAIT).unwrap() {
                (tag, LoadEvent::Succeeded(_)) => order.push(tag),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(order, vec!["first", "second"]);
        assert_eq!(gate.calls(), 1);
        assert!(!loader.is_in_flight(&descriptor));
    }

    #[test]
    fn test_cancel_notifies_all_joiners_and_allows_fresh_task() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(GateTransport::new(png_bytes(10, 10)));
        let loader = loader_with(&temp, gate.clone());
        let descriptor = RequestDescriptor::new("http://example.com/c.png", 50, 50);
        let (tx, rx) = mpsc::channel();

        loader.submit(descriptor.clone(), tagged("a", &tx));
        loader.submit(descriptor.clone(), tagged("b", &tx));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("a", LoadEvent::Started)));

        assert!(loader.cancel(&descriptor));
        assert!(matches!(rx.try_recv().unwrap(), ("a", LoadEvent::Cancelled)));
        assert!(matches!(rx.try_recv().unwrap(), ("b", LoadEvent::Cancelled)));
        assert!(!loader.cancel(&descriptor));

        // A fresh submission starts a new task rather than reviving the old one.
        assert_eq!(loader.submit(descriptor.clone(), tagged("c", &tx)), Submission::Started);
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("c", LoadEvent::Started)));

        gate.open();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("c", LoadEvent::Succeeded(_))));
        // Nothing more for the cancelled listeners.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    /// Backend that blocks inside `decode` until released, past every
    /// cancellation point of the task.
    struct HeldBackend {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DecodeBackend for HeldBackend {
        fn dimensions(&self, _bytes: &[u8]) -> Result<(u32, u32), crate::decode::BackendError> {
            Ok((8, 8))
        }

        fn decode(&self, _bytes: &[u8], _sample: u32) -> Result<::image::RgbaImage, crate::decode::BackendError> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv_timeout(WAIT);
            Ok(::image::RgbaImage::new(8, 8))
        }
    }

    #[test]
    fn test_task_finishing_after_cancel_is_cached_silently() {
        let temp = TempDir::new().unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = Arc::new(HeldBackend {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let loader = ImageLoader::builder(config(&temp))
            .transport(Arc::new(MockTransport::always(MockReply::Ok(png_bytes(8, 8)))))
            .backend(backend)
            .build()
            .unwrap();
        let descriptor = RequestDescriptor::new("http://example.com/late.png", 0, 0);
        let (tx, rx) = mpsc::channel();

        loader.submit(descriptor.clone(), tagged("a", &tx));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("a", LoadEvent::Started)));
        entered_rx.recv_timeout(WAIT).unwrap();

        assert!(loader.cancel(&descriptor));
        assert!(matches!(rx.try_recv().unwrap(), ("a", LoadEvent::Cancelled)));

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + WAIT;
        while loader.find_cached(&descriptor).is_none() {
            assert!(std::time::Instant::now() < deadline, "late result never cached");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        let stats = loader.stats();
        assert_eq!(stats.superseded, 1);
        assert_eq!(stats.succeeded, 0);
    }

    #[test]
    fn test_non_200_fails_permanently() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::always(MockReply::Status(404)));
        let loader = loader_with(&temp, mock.clone());
        let (tx, rx) = mpsc::channel();

        loader.submit(
            RequestDescriptor::new("http://example.com/missing.png", 10, 10),
            tagged("a", &tx),
        );
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("a", LoadEvent::Started)));
        match rx.recv_timeout(WAIT).unwrap() {
            ("a", LoadEvent::Failed(err)) => assert_eq!(err.kind(), ErrorKind::Permanent),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(mock.calls(), 1);
        assert_eq!(loader.stats().failed, 1);
    }

    #[test]
    fn test_shutdown_cancels_and_rejects() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::always(MockReply::Hang));
        let loader = loader_with(&temp, mock);
        let descriptor = RequestDescriptor::new("http://example.com/slow.png", 10, 10);
        let (tx, rx) = mpsc::channel();

        loader.submit(descriptor.clone(), tagged("a", &tx));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("a", LoadEvent::Started)));

        loader.shutdown();
        assert!(matches!(rx.try_recv().unwrap(), ("a", LoadEvent::Cancelled)));
        assert!(loader.is_shut_down());

        assert_eq!(loader.submit(descriptor, tagged("b", &tx)), Submission::Rejected);
        assert!(matches!(rx.try_recv().unwrap(), ("b", LoadEvent::Cancelled)));

        loader.shutdown();
        assert_eq!(loader.stats().rejected, 1);
    }

    #[test]
    fn test_load_convenience() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::always(MockReply::Ok(png_bytes(20, 20))));
        let loader = loader_with(&temp, mock);

        let image = futures::executor::block_on(
            loader.load(RequestDescriptor::new("http://example.com/l.png", 0, 0)),
        )
        .unwrap();
        assert_eq!((image.width(), image.height()), (20, 20));

        let err = futures::executor::block_on(
            loader.load(RequestDescriptor::new("gopher://example.com/l.png", 0, 0)),
        )
        .unwrap_err();
        assert!(matches!(err, LoadFailure::Failed(LoadError::Permanent(_))));
    }

    #[test]
    fn test_clear_memory_cache() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::always(MockReply::Ok(png_bytes(8, 8))));
        let loader = loader_with(&temp, mock.clone());
        let descriptor = RequestDescriptor::new("http://example.com/m.png", 0, 0);

        futures::executor::block_on(loader.load(descriptor.clone())).unwrap();
        assert!(loader.find_cached(&descriptor).is_some());

        loader.clear_memory_cache();
        assert!(loader.find_cached(&descriptor).is_none());

        // Served from the byte store the second time.
        futures::executor::block_on(loader.load(descriptor)).unwrap();
        assert_eq!(mock.calls(), 1);

        let cleared = loader.clear_disk_cache();
        assert_eq!(cleared.entries_evicted, 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(GateTransport::new(png_bytes(4, 4)));
        let loader = loader_with(&temp, gate.clone());
        let descriptor = RequestDescriptor::new("http://example.com/p.png", 0, 0);
        let (tx, rx) = mpsc::channel();

        loader.submit(descriptor.clone(), |_: &RequestDescriptor, event: LoadEvent| {
            if event.is_terminal() {
                panic!("listener bug");
            }
        });
        loader.submit(descriptor, tagged("ok", &tx));
        gate.open();

        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ("ok", LoadEvent::Succeeded(_))));
    }
}
