//! Bounded on-disk byte store.
//!
//! [`ByteStore`] maps a [`CacheKey`] to a raw blob stored as one file in a
//! flat directory. Capacity is bounded by an injected [`CapacityPolicy`];
//! before every insert the store runs an eviction pass that deletes the
//! least-recently-used entries until the policy is satisfied.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   .nomedia          sentinel, never an entry
//!   3fa2c01b9e44d7a0  one file per key (lowercase hex)
//!   9b1e...
//! ```
//!
//! Recency is the file's modification time. `get` touches it, so a read
//! hit moves the entry to the back of the eviction order.
//!
//! # Concurrency
//!
//! The store is a monitor: every public operation holds one mutex for its
//! whole duration, including the body write in `put`. Callers on an async
//! runtime should go through `spawn_blocking`.

mod policy;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::request::CacheKey;

pub use policy::{Capacity, CapacityPolicy, CountLimit, SizeLimit};

/// Sentinel asking media scanners to skip the directory.
pub const SENTINEL_FILE: &str = ".nomedia";

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not create its directory at open time.
    #[error("store at {0} is disabled")]
    Disabled(PathBuf),

    /// The directory vanished and could not be recreated.
    #[error("failed to create store directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing the entry failed; the partial file was removed.
    #[error("failed to write store entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The reader feeding the entry failed; the partial file was removed.
    #[error("failed to read entry source: {0}")]
    Source(#[source] io::Error),
}

impl StoreError {
    /// True when the store itself is unusable, as opposed to the data
    /// source feeding it.
    pub fn is_storage_failure(&self) -> bool {
        !matches!(self, Self::Source(_))
    }
}

/// Which side of a copy failed.
enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Result of an eviction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionResult {
    /// Entries deleted.
    pub entries_evicted: u64,
    /// Bytes freed.
    pub bytes_freed: u64,
}

#[derive(Debug)]
struct StoreState {
    enabled: bool,
    size_bytes: u64,
    entry_count: u64,
}

struct EntryInfo {
    path: PathBuf,
    name: String,
    len: u64,
    modified: FileTime,
}

/// Directory-backed LRU byte store.
#[derive(Debug)]
pub struct ByteStore {
    root: PathBuf,
    policy: Box<dyn CapacityPolicy>,
    state: Mutex<StoreState>,
}

impl ByteStore {
    /// Opens (or creates) the store at `root`.
    ///
    /// Existing files seed the size and count totals. If the directory cannot
    /// be created the store is returned disabled: `get` misses and `put`
    /// fails with [`StoreError::Disabled`].
    pub fn open(root: impl Into<PathBuf>, policy: Box<dyn CapacityPolicy>) -> Self {
        let root = root.into();
        let mut state = StoreState {
            enabled: false,
            size_bytes: 0,
            entry_count: 0,
        };

        match ensure_directory(&root) {
            Ok(()) => {
                state.enabled = true;
                for entry in scan_entries(&root) {
                    state.size_bytes += entry.len;
                    state.entry_count += 1;
                }
                info!(
                    root = %root.display(),
                    policy = %policy.describe(),
                    entries = state.entry_count,
                    bytes = state.size_bytes,
                    "Byte store opened"
                );
            }
            Err(e) => {
                warn!(
                    root = %root.display(),
                    error = %e,
                    "Failed to create store directory, persistent cache disabled"
                );
            }
        }

        Self {
            root,
            policy,
            state: Mutex::new(state),
        }
    }

    /// Opens a store with a [`Capacity`] bound.
    pub fn with_capacity(root: impl Into<PathBuf>, capacity: Capacity) -> Self {
        Self::open(root, capacity.into_policy())
    }

    /// Returns the path of the stored blob, touching its recency.
    pub fn get(&self, key: CacheKey) -> Option<PathBuf> {
        let state = self.state.lock();
        if !state.enabled {
            return None;
        }

        let path = self.entry_path(key);
        if !path.is_file() {
            return None;
        }
        if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
            // Still a hit; the entry just keeps its old recency.
            debug!(path = %path.display(), error = %e, "Failed to touch store entry");
        }
        Some(path)
    }

    /// Streams `reader` into the entry for `key`.
    ///
    /// Runs the eviction pass first. An existing entry for the same key is
    /// replaced. On failure the partial file is removed and the totals are
    /// left untouched.
    pub fn put(&self, key: CacheKey, reader: &mut dyn Read) -> Result<PathBuf, StoreError> {
        let mut state = self.state.lock();
        if !state.enabled {
            return Err(StoreError::Disabled(self.root.clone()));
        }

        ensure_directory(&self.root).map_err(|source| StoreError::Directory {
            path: self.root.clone(),
            source,
        })?;

        let path = self.entry_path(key);
        self.remove_existing(&mut state, &path);
        self.evict(&mut state);

        match write_entry(&path, reader) {
            Ok(written) => {
                state.size_bytes += written;
                state.entry_count += 1;
                debug!(
                    key = %key,
                    bytes = written,
                    total_bytes = state.size_bytes,
                    entries = state.entry_count,
                    "Stored entry"
                );
                Ok(path)
            }
            Err(CopyError::Read(source)) => {
                let _ = fs::remove_file(&path);
                debug!(path = %path.display(), error = %source, "Entry source failed");
                Err(StoreError::Source(source))
            }
            Err(CopyError::Write(source)) => {
                let _ = fs::remove_file(&path);
                warn!(path = %path.display(), error = %source, "Failed to write store entry");
                Err(StoreError::Write { path, source })
            }
        }
    }

    /// Deletes every entry and resets the totals.
    ///
    /// Entries that cannot be deleted stay counted.
    pub fn clear(&self) -> EvictionResult {
        let mut state = self.state.lock();
        let mut result = EvictionResult::default();
        if !state.enabled {
            return result;
        }

        let mut remaining_bytes = 0;
        let mut remaining_entries = 0;
        for entry in scan_entries(&self.root) {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    result.entries_evicted += 1;
                    result.bytes_freed += entry.len;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to delete store entry");
                    remaining_bytes += entry.len;
                    remaining_entries += 1;
                }
            }
        }
        state.size_bytes = remaining_bytes;
        state.entry_count = remaining_entries;

        info!(
            entries = result.entries_evicted,
            bytes = result.bytes_freed,
            "Byte store cleared"
        );
        result
    }

    /// Aggregate size of all entries in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().size_bytes
    }

    /// Number of entries.
    pub fn entry_count(&self) -> u64 {
        self.state.lock().entry_count
    }

    /// Returns false if the directory could not be created at open time.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// The store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an entry for `key` is stored under.
    pub fn entry_path(&self, key: CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn remove_existing(&self, state: &mut StoreState, path: &Path) {
        let len = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return,
        };
        // A file that cannot be removed is truncated by the write that
        // follows, so it leaves the totals either way.
        if let Err(e) = fs::remove_file(path) {
            debug!(path = %path.display(), error = %e, "Failed to remove replaced entry");
        }
        state.size_bytes = state.size_bytes.saturating_sub(len);
        state.entry_count = state.entry_count.saturating_sub(1);
    }

    /// Deletes least-recently-used entries until the policy accepts one more.
    ///
    /// The scan re-seeds the totals from disk, so files added or removed
    /// behind the store's back are reconciled here.
    fn evict(&self, state: &mut StoreState) -> EvictionResult {
        let mut result = EvictionResult::default();
        if !self
            .policy
            .is_over_budget(state.size_bytes, state.entry_count + 1)
        {
            return result;
        }

        let mut entries = scan_entries(&self.root);
        state.size_bytes = entries.iter().map(|e| e.len).sum();
        state.entry_count = entries.len() as u64;
        entries.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.name.cmp(&b.name))
        });

        for entry in entries {
            if !self
                .policy
                .is_over_budget(state.size_bytes, state.entry_count + 1)
            {
                break;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %entry.path.display(), "Entry vanished during eviction");
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to evict entry");
                    continue;
                }
            }
            state.size_bytes = state.size_bytes.saturating_sub(entry.len);
            state.entry_count = state.entry_count.saturating_sub(1);
            result.entries_evicted += 1;
            result.bytes_freed += entry.len;
        }

        if result.entries_evicted > 0 {
            debug!(
                evicted = result.entries_evicted,
                freed = result.bytes_freed,
                "Eviction pass complete"
            );
        }
        result
    }
}

fn ensure_directory(root: &Path) -> io::Result<()> {
    fs::create_dir_all(root)?;
    let sentinel = root.join(SENTINEL_FILE);
    if !sentinel.exists() {
        if let Err(e) = File::create(&sentinel) {
            warn!(path = %sentinel.display(), error = %e, "Failed to create sentinel file");
        }
    }
    Ok(())
}

fn write_entry(path: &Path, reader: &mut dyn Read) -> Result<u64, CopyError> {
    let file = File::create(path).map_err(CopyError::Write)?;
    let mut writer = BufWriter::new(file);
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        written += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(written)
}

fn scan_entries(root: &Path) -> Vec<EntryInfo> {
    let read_dir = match fs::read_dir(root) {
        Ok(rd) => rd,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Failed to scan store directory");
            return Vec::new();
        }
    };

    read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == SENTINEL_FILE {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(EntryInfo {
                path: entry.path(),
                name,
                len: meta.len(),
                modified: FileTime::from_last_modification_time(&meta),
            })
        })
        .collect()
}
