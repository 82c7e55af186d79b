//! INI configuration file support.
//!
//! ```ini
//! [cache]
//! directory = ~/.cache
//! fallback_directory = /tmp
//! name = image
//! max_size = 4MB
//! memory_entries = 100
//!
//! [pool]
//! min_workers = 4
//! max_workers = 8
//! keep_alive_ms = 1000
//!
//! [fetch]
//! attempts = 3
//! backoff_ms = 2000
//! connect_timeout_secs = 15
//! request_timeout_secs = 30
//!
//! [decode]
//! attempts = 3
//! retry_pause_ms = 1000
//! pixel_budget = 64MB
//! max_alloc = 512MB
//! ```
//!
//! Every key is optional. Missing keys keep their defaults. `max_entries`
//! switches the disk cache to a count bound and cannot be combined with
//! `max_size`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::{LoaderConfig, PoolConfig, StorageRoot};
use crate::store::Capacity;

/// Errors raised while reading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or parsed as INI.
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// INI syntax error in in-memory content.
    #[error("invalid config syntax: {0}")]
    Syntax(String),

    /// A key held a value of the wrong shape.
    #[error("invalid value for [{section}] {key}: '{value}'")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    /// Mutually exclusive keys were both set.
    #[error("[cache] max_size and max_entries cannot both be set")]
    ConflictingCapacity,
}

/// A parsed configuration file.
#[derive(Debug)]
pub struct ConfigFile {
    ini: Ini,
}

impl ConfigFile {
    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { ini })
    }

    /// Parses INI content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Syntax(e.to_string()))?;
        Ok(Self { ini })
    }

    /// Applies the file's settings on top of `LoaderConfig::default()`.
    pub fn to_loader_config(&self) -> Result<LoaderConfig, ConfigError> {
        let mut config = LoaderConfig::default();
        self.apply(&mut config)?;
        Ok(config)
    }

    /// Applies the file's settings on top of `config`.
    pub fn apply(&self, config: &mut LoaderConfig) -> Result<(), ConfigError> {
        if let Some(cache) = self.ini.section(Some("cache")) {
            apply_cache(cache, config)?;
        }
        if let Some(pool) = self.ini.section(Some("pool")) {
            apply_pool(pool, config)?;
        }
        if let Some(fetch) = self.ini.section(Some("fetch")) {
            if let Some(attempts) = parse_key::<u32>(fetch, "fetch", "attempts")? {
                config.fetch.attempts = attempts.max(1);
            }
            if let Some(ms) = parse_key::<u64>(fetch, "fetch", "backoff_ms")? {
                config.fetch.backoff = Duration::from_millis(ms);
            }
            if let Some(secs) = parse_key::<u64>(fetch, "fetch", "connect_timeout_secs")? {
                config.fetch.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_key::<u64>(fetch, "fetch", "request_timeout_secs")? {
                config.fetch.request_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(decode) = self.ini.section(Some("decode")) {
            if let Some(attempts) = parse_key::<u32>(decode, "decode", "attempts")? {
                config.decode.attempts = attempts.max(1);
            }
            if let Some(ms) = parse_key::<u64>(decode, "decode", "retry_pause_ms")? {
                config.decode.retry_pause = Duration::from_millis(ms);
            }
            if let Some(value) = decode.get("pixel_budget") {
                config.decode.pixel_budget_bytes =
                    parse_size(value).ok_or_else(|| ConfigError::InvalidValue {
                        section: "decode",
                        key: "pixel_budget",
                        value: value.to_string(),
                    })?;
            }
            if let Some(value) = decode.get("max_alloc") {
                config.decode.max_alloc_bytes =
                    parse_size(value).ok_or_else(|| ConfigError::InvalidValue {
                        section: "decode",
                        key: "max_alloc",
                        value: value.to_string(),
                    })?;
            }
        }
        Ok(())
    }
}

fn apply_cache(cache: &Properties, config: &mut LoaderConfig) -> Result<(), ConfigError> {
    let defaults = StorageRoot::default();
    let preferred = cache.get("directory").map(expand_tilde).or(defaults.preferred);
    let fallback = cache
        .get("fallback_directory")
        .map(expand_tilde)
        .unwrap_or(defaults.fallback);
    let name = cache
        .get("name")
        .map(str::to_string)
        .unwrap_or(defaults.name);
    config.store.root = StorageRoot {
        preferred,
        fallback,
        name,
    };

    let max_size = cache.get("max_size");
    let max_entries = cache.get("max_entries");
    config.store.capacity = match (max_size, max_entries) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingCapacity),
        (Some(size), None) => {
            Capacity::Bytes(parse_size(size).ok_or_else(|| ConfigError::InvalidValue {
                section: "cache",
                key: "max_size",
                value: size.to_string(),
            })?)
        }
        (None, Some(_)) => Capacity::Entries(
            parse_key::<u64>(cache, "cache", "max_entries")?.unwrap_or_default(),
        ),
        (None, None) => config.store.capacity,
    };

    if let Some(entries) = parse_key::<u64>(cache, "cache", "memory_entries")? {
        config.memory_entries.max_entries = entries;
    }
    Ok(())
}

fn apply_pool(pool: &Properties, config: &mut LoaderConfig) -> Result<(), ConfigError> {
    let min = parse_key::<usize>(pool, "pool", "min_workers")?.unwrap_or(config.pool.min_workers);
    let max = parse_key::<usize>(pool, "pool", "max_workers")?.unwrap_or(config.pool.max_workers);
    let mut updated = PoolConfig::new(min, max);
    updated.keep_alive = match parse_key::<u64>(pool, "pool", "keep_alive_ms")? {
        Some(ms) => Duration::from_millis(ms),
        None => config.pool.keep_alive,
    };
    config.pool = updated;
    Ok(())
}

fn parse_key<T: FromStr>(
    props: &Properties,
    section: &'static str,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                section,
                key,
                value: raw.to_string(),
            }),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parses a size such as `4MB`, `512K`, `2 GB` or `1024`.
///
/// Units are binary (1K = 1024 bytes). Returns `None` for malformed input.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_uppercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let number: u64 = digits.parse().ok()?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

/// Formats a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
