//! Integration tests for the image loader.
//!
//! These tests drive the public API end to end:
//! - submit → fetch → store → decode → listeners
//! - deduplication, cancellation and retry bounds
//! - byte store eviction order and bounds
//!
//! Run with: `cargo test --test loader_integration`

use std::io::{self, Cursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use image::{ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use imageloader::config::{ConfigFile, FetchConfig, LoaderConfig, PoolConfig, StorageRoot};
use imageloader::fetch::{BoxFuture, HttpResponse, HttpTransport, TransportError};
use imageloader::loader::{ChannelListener, ImageLoader, LoadEvent, Submission};
use imageloader::source::{ContentData, ContentResolver};
use imageloader::store::{ByteStore, Capacity};
use imageloader::{ErrorKind, LoadFailure, Orientation, RequestDescriptor, ThumbnailKind};

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(10);

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([12, 34, 56, 255]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    Status(u16),
    Timeout,
}

/// Transport with a fixed reply, optionally held behind a gate.
struct TestTransport {
    reply: Reply,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl TestTransport {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn gated(reply: Reply) -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(reply)
        }
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpTransport for TestTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            match &self.reply {
                Reply::Body(body) => Ok(HttpResponse::from_bytes(200, body.clone())),
                Reply::Status(code) => Ok(HttpResponse::from_bytes(*code, Vec::new())),
                Reply::Timeout => Err(TransportError::Timeout {
                    url: url.to_string(),
                }),
            }
        })
    }
}

fn test_config(temp: &TempDir) -> LoaderConfig {
    LoaderConfig::with_cache_root(StorageRoot::fixed(temp.path().join("image")))
        .with_pool(PoolConfig::new(2, 4))
        .with_fetch(FetchConfig::default().with_backoff(Duration::from_millis(10)))
}

fn start(temp: &TempDir, transport: Arc<TestTransport>) -> ImageLoader {
    ImageLoader::builder(test_config(temp))
        .transport(transport)
        .build()
        .unwrap()
}

async fn next(rx: &mut mpsc::UnboundedReceiver<LoadEvent>) -> LoadEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("listener channel closed")
}

// ============================================================================
// Coordinator
// ============================================================================

#[tokio::test]
async fn test_identical_requests_fetch_once() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(TestTransport::gated(Reply::Body(png(32, 32))));
    let loader = start(&temp, transport.clone());
    let descriptor = RequestDescriptor::new("https://example.com/cat.png", 64, 64);

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    assert_eq!(
        loader.submit(descriptor.clone(), ChannelListener(tx_a)),
        Submission::Started
    );
    assert_eq!(
        loader.submit(descriptor.clone(), ChannelListener(tx_b)),
        Submission::Joined
    );
    assert!(matches!(next(&mut rx_a).await, LoadEvent::Started));

    transport.release();

    assert!(matches!(next(&mut rx_a).await, LoadEvent::Succeeded(_)));
    assert!(matches!(next(&mut rx_b).await, LoadEvent::Succeeded(_)));
    assert_eq!(transport.calls(), 1);
    assert!(loader.find_cached(&descriptor).is_some());
}

#[tokio::test]
async fn test_cancel_then_resubmit_starts_fresh_task() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(TestTransport::gated(Reply::Body(png(8, 8))));
    let loader = start(&temp, transport.clone());
    let descriptor = RequestDescriptor::new("https://example.com/dog.png", 64, 64);

    let (tx_old, mut rx_old) = mpsc::unbounded_channel();
    loader.submit(descriptor.clone(), ChannelListener(tx_old));
    assert!(matches!(next(&mut rx_old).await, LoadEvent::Started));

    assert!(loader.cancel(&descriptor));
    assert!(matches!(next(&mut rx_old).await, LoadEvent::Cancelled));
    assert!(!loader.is_in_flight(&descriptor));

    let (tx_new, mut rx_new) = mpsc::unbounded_channel();
    assert_eq!(
        loader.submit(descriptor.clone(), ChannelListener(tx_new)),
        Submission::Started
    );
    assert!(matches!(next(&mut rx_new).await, LoadEvent::Started));

    transport.release();
    assert!(matches!(next(&mut rx_new).await, LoadEvent::Succeeded(_)));

    // The cancelled listener hears nothing more.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx_old.try_recv().is_err());
}

#[tokio::test]
async fn test_not_found_makes_exactly_one_attempt() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(TestTransport::new(Reply::Status(404)));
    let loader = start(&temp, transport.clone());

    let err = loader
        .load(RequestDescriptor::new("https://example.com/gone.png", 0, 0))
        .await
        .unwrap_err();

    match err {
        LoadFailure::Failed(e) => assert_eq!(e.kind(), ErrorKind::Permanent),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_timeouts_make_exactly_three_attempts() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(TestTransport::new(Reply::Timeout));
    let loader = start(&temp, transport.clone());

    let err = loader
        .load(RequestDescriptor::new("https://example.com/slow.png", 0, 0))
        .await
        .unwrap_err();

    match err {
        LoadFailure::Failed(e) => assert_eq!(e.kind(), ErrorKind::Transient),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_large_image_fits_bounds() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(TestTransport::new(Reply::Body(png(2000, 1000))));
    let loader = start(&temp, transport);

    let image = loader
        .load(RequestDescriptor::new("https://example.com/wide.png", 500, 500))
        .await
        .unwrap();

    assert!(image.width().max(image.height()) <= 500);
    // Decoded at 1/4 or coarser.
    assert!(image.width() <= 2000 / 4);
}

#[tokio::test]
async fn test_local_file_source() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("local.png");
    std::fs::write(&path, png(30, 10)).unwrap();
    let transport = Arc::new(TestTransport::new(Reply::Status(500)));
    let loader = start(&temp, transport.clone());

    let image = loader
        .load(
            RequestDescriptor::new(path.to_string_lossy(), 100, 100)
                .with_orientation(Orientation::Rotate90),
        )
        .await
        .unwrap();

    assert_eq!((image.width(), image.height()), (10, 30));
    assert_eq!(transport.calls(), 0);
}

struct ThumbnailResolver;

impl ContentResolver for ThumbnailResolver {
    fn open(&self, _uri: &str, thumbnail: Option<ThumbnailKind>) -> io::Result<ContentData> {
        let (w, h) = match thumbnail {
            Some(ThumbnailKind::Micro) => (96, 96),
            Some(ThumbnailKind::Mini) => (512, 384),
            None => (1024, 768),
        };
        Ok(ContentData::new(png(w, h)))
    }
}

#[tokio::test]
async fn test_content_thumbnail_through_resolver() {
    let temp = TempDir::new().unwrap();
    let loader = ImageLoader::builder(test_config(&temp))
        .transport(Arc::new(TestTransport::new(Reply::Status(500))))
        .content_resolver(Arc::new(ThumbnailResolver))
        .build()
        .unwrap();

    let micro = loader
        .load(RequestDescriptor::thumbnail(
            "content://media/external/images/5",
            ThumbnailKind::Micro,
        ))
        .await
        .unwrap();
    assert_eq!((micro.width(), micro.height()), (96, 96));

    let full = loader
        .load(RequestDescriptor::new("content://media/external/images/5", 0, 0))
        .await
        .unwrap();
    assert_eq!((full.width(), full.height()), (1024, 768));
}

#[tokio::test]
async fn test_loader_from_config_file() {
    let temp = TempDir::new().unwrap();
    let content = format!(
        "[cache]\ndirectory = {}\nname = thumbs\nmax_entries = 2\n\n[fetch]\nbackoff_ms = 5\n",
        temp.path().display()
    );
    let config = ConfigFile::parse(&content)
        .unwrap()
        .to_loader_config()
        .unwrap();
    let transport = Arc::new(TestTransport::new(Reply::Body(png(4, 4))));
    let loader = ImageLoader::builder(config)
        .transport(transport)
        .build()
        .unwrap();

    assert_eq!(loader.cache_root(), temp.path().join("thumbs"));
    for n in 0..3 {
        loader
            .load(RequestDescriptor::new(format!("https://example.com/{n}.png"), 0, 0))
            .await
            .unwrap();
    }
    assert_eq!(loader.stats().disk_entries, 2);
}

// ============================================================================
// Byte store
// ============================================================================

fn key(n: u32) -> imageloader::CacheKey {
    imageloader::CacheKey::from_unique_id(&format!("https://example.com/{n}.jpg"))
}

fn age(path: &std::path::Path, secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

#[test]
fn test_store_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = ByteStore::with_capacity(temp.path(), Capacity::Bytes(4 * 1024 * 1024));

    let written = store
        .put(key(1), &mut Cursor::new(b"raw image bytes".to_vec()))
        .unwrap();
    let read = store.get(key(1)).unwrap();

    assert_eq!(written, read);
    assert_eq!(std::fs::read(read).unwrap(), b"raw image bytes");
}

#[test]
fn test_store_get_refreshes_recency() {
    let temp = TempDir::new().unwrap();
    let store = ByteStore::with_capacity(temp.path(), Capacity::Entries(3));

    let a = store.put(key(1), &mut Cursor::new(vec![1; 10])).unwrap();
    let b = store.put(key(2), &mut Cursor::new(vec![2; 10])).unwrap();
    let c = store.put(key(3), &mut Cursor::new(vec![3; 10])).unwrap();
    age(&a, 100);
    age(&b, 200);
    age(&c, 300);

    // A becomes the most recent; B is now the eviction candidate.
    store.get(key(1)).unwrap();
    store.put(key(4), &mut Cursor::new(vec![4; 10])).unwrap();

    assert!(a.exists());
    assert!(!b.exists());
    assert!(c.exists());
}

#[test]
fn test_store_never_exceeds_three_entries() {
    let temp = TempDir::new().unwrap();
    let store = ByteStore::with_capacity(temp.path(), Capacity::Entries(3));

    for n in 0..10 {
        let path = store.put(key(n), &mut Cursor::new(vec![0; 16])).unwrap();
        age(&path, 1_000 + i64::from(n));
        assert!(store.entry_count() <= 3);
    }

    // The survivors are the three most recently written.
    for n in 7..10 {
        assert!(store.get(key(n)).is_some(), "entry {n} should survive");
    }
    for n in 0..7 {
        assert!(store.get(key(n)).is_none(), "entry {n} should be evicted");
    }
}
