//! Loader configuration.
//!
//! [`LoaderConfig`] combines everything needed to start an
//! [`ImageLoader`](crate::loader::ImageLoader): where the disk cache lives and
//! how large it may grow, how many decoded images stay in memory, how the
//! worker pool is sized, and the retry bounds for fetching and decoding.
//!
//! Every section has a `Default` matching the values the loader was tuned
//! with, plus `with_*` builders for the common overrides. A config file can
//! be read with [`ConfigFile`].

mod file;
mod storage;

use std::time::Duration;

use crate::store::Capacity;

pub use file::{format_size, parse_size, ConfigError, ConfigFile};
pub use storage::StorageRoot;

/// Default disk cache bound (4 MB).
pub const DEFAULT_DISK_CACHE_BYTES: u64 = 4 * 1024 * 1024;

/// Default number of decoded images kept in memory.
pub const DEFAULT_MEMORY_CACHE_ENTRIES: u64 = 100;

/// Default name of the cache directory under the storage root.
pub const DEFAULT_CACHE_NAME: &str = "image";

/// Default number of always-on workers.
pub const DEFAULT_MIN_WORKERS: usize = 4;

/// Default upper bound on concurrently running loads.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default idle time before a surplus worker thread is retired.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Default number of network attempts per fetch.
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Default wait between network attempts.
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(2);

/// Default connect timeout for the HTTP transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default whole-request timeout for the HTTP transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of decode passes when memory runs short.
pub const DEFAULT_DECODE_ATTEMPTS: u32 = 3;

/// Default pause between decode passes.
pub const DEFAULT_DECODE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Default budget for a decoded pixel buffer (64 MB, 16M RGBA pixels).
pub const DEFAULT_PIXEL_BUDGET_BYTES: u64 = 64 * 1024 * 1024;

/// Default allocation ceiling handed to the image decoder (512 MB).
pub const DEFAULT_MAX_DECODE_ALLOC_BYTES: u64 = 512 * 1024 * 1024;

/// Top-level loader configuration.
#[derive(Clone, Debug, Default)]
pub struct LoaderConfig {
    /// Disk cache configuration.
    pub store: StoreConfig,

    /// Maximum number of decoded images kept in memory.
    pub memory_entries: MemoryCacheConfig,

    /// Worker pool sizing.
    pub pool: PoolConfig,

    /// Network retry settings.
    pub fetch: FetchConfig,

    /// Decode retry settings.
    pub decode: DecodeConfig,
}

impl LoaderConfig {
    /// Creates a config with default settings and an explicit cache root.
    pub fn with_cache_root(root: StorageRoot) -> Self {
        Self {
            store: StoreConfig::new(root),
            ..Self::default()
        }
    }

    /// Set the disk cache capacity.
    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.store.capacity = capacity;
        self
    }

    /// Set the memory cache capacity in entries.
    pub fn with_memory_entries(mut self, entries: u64) -> Self {
        self.memory_entries.max_entries = entries;
        self
    }

    /// Set the worker pool configuration.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the fetch configuration.
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Set the decode configuration.
    pub fn with_decode(mut self, decode: DecodeConfig) -> Self {
        self.decode = decode;
        self
    }
}

/// Disk cache configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Where the cache directory is placed.
    pub root: StorageRoot,

    /// Capacity bound.
    pub capacity: Capacity,
}

impl StoreConfig {
    /// Create a store config with the default size bound.
    pub fn new(root: StorageRoot) -> Self {
        Self {
            root,
            capacity: Capacity::Bytes(DEFAULT_DISK_CACHE_BYTES),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(StorageRoot::default())
    }
}

/// In-memory cache configuration.
#[derive(Clone, Debug)]
pub struct MemoryCacheConfig {
    /// Maximum number of decoded images.
    pub max_entries: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MEMORY_CACHE_ENTRIES,
        }
    }
}

/// Worker pool configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers that are always alive.
    pub min_workers: usize,

    /// Upper bound on concurrently running loads.
    pub max_workers: usize,

    /// Idle time before surplus threads retire.
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl PoolConfig {
    /// Create a pool config, clamping so that `1 <= min <= max`.
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        let min_workers = min_workers.max(1);
        Self {
            min_workers,
            max_workers: max_workers.max(min_workers),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Set the keep-alive.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Network fetch configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConfig {
    /// Total attempts, including the first.
    pub attempts: u32,

    /// Wait between attempts after a transport failure.
    pub backoff: Duration,

    /// Connect timeout for the default transport.
    pub connect_timeout: Duration,

    /// Whole-request timeout for the default transport.
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_FETCH_ATTEMPTS,
            backoff: DEFAULT_FETCH_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl FetchConfig {
    /// Set the attempt bound (at least one attempt is always made).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Set the backoff between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Decode configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Decode passes attempted under memory pressure.
    pub attempts: u32,

    /// Pause between passes.
    pub retry_pause: Duration,

    /// Largest decoded buffer accepted, in bytes.
    pub pixel_budget_bytes: u64,

    /// Allocation ceiling for the decoder itself, in bytes.
    pub max_alloc_bytes: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_DECODE_ATTEMPTS,
            retry_pause: DEFAULT_DECODE_RETRY_PAUSE,
            pixel_budget_bytes: DEFAULT_PIXEL_BUDGET_BYTES,
            max_alloc_bytes: DEFAULT_MAX_DECODE_ALLOC_BYTES,
        }
    }
}

impl DecodeConfig {
    /// Set the attempt bound (at least one pass is always made).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Set the pause between passes.
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Set the decoded buffer budget.
    pub fn with_pixel_budget(mut self, bytes: u64) -> Self {
        self.pixel_budget_bytes = bytes;
        self
    }

    /// Set the decoder allocation ceiling.
    pub fn with_max_alloc(mut self, bytes: u64) -> Self {
        self.max_alloc_bytes = bytes;
        self
    }
}
