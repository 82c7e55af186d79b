//! imageloader - deduplicating image loading with bounded caches
//!
//! This library fetches images from the network or local storage, decodes
//! them to fit requested bounds, and keeps the results in two caches: a
//! size- or count-bounded LRU directory of raw bytes, and a bounded LRU map of
//! decoded images in memory. Identical concurrent requests share one
//! in-flight load and can be cancelled by key.
//!
//! # Architecture
//!
//! ```text
//!   ImageLoader ──► InFlight table ──► WorkerPool
//!       │                                 │
//!   memory cache (moka)        Fetcher ──► Decoder
//!                                 │
//!                             ByteStore (disk LRU)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use imageloader::config::LoaderConfig;
//! use imageloader::loader::{ImageLoader, LoadEvent};
//! use imageloader::request::RequestDescriptor;
//!
//! let loader = ImageLoader::start(LoaderConfig::default()).unwrap();
//! let descriptor = RequestDescriptor::new("https://example.com/cat.jpg", 512, 512);
//! loader.submit(descriptor, |d: &RequestDescriptor, event: LoadEvent| {
//!     println!("{}: {:?}", d, event);
//! });
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod request;
pub mod source;
pub mod store;

pub use error::{ErrorKind, LoadError, LoadFailure, LoaderError};
pub use loader::{ImageLoader, LoadEvent, LoadListener, Submission};
pub use request::{CacheKey, Orientation, RequestDescriptor, ThumbnailKind};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
