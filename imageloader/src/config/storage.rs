//! Storage root selection.
//!
//! The disk cache lives under one of two roots: a preferred, high-capacity
//! location (the user cache directory by default) when it is present and
//! writable, otherwise a fallback location that is always expected to work.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::DEFAULT_CACHE_NAME;

/// Name of the probe file used to test writability.
const PROBE_FILE: &str = ".imageloader-probe";

/// Two-tier cache root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageRoot {
    /// Preferred volume, used when present and writable.
    pub preferred: Option<PathBuf>,

    /// Fallback volume.
    pub fallback: PathBuf,

    /// Directory name created under the chosen root.
    pub name: String,
}

impl Default for StorageRoot {
    fn default() -> Self {
        Self {
            preferred: dirs::cache_dir(),
            fallback: std::env::temp_dir(),
            name: DEFAULT_CACHE_NAME.to_string(),
        }
    }
}

impl StorageRoot {
    /// A root that always resolves to `directory` (no tiering).
    pub fn fixed(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self {
            preferred: None,
            fallback: directory,
            name: String::new(),
        }
    }

    /// A two-tier root.
    pub fn tiered(
        preferred: impl Into<PathBuf>,
        fallback: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            preferred: Some(preferred.into()),
            fallback: fallback.into(),
            name: name.into(),
        }
    }

    /// Resolves the cache directory.
    ///
    /// The preferred root wins when it already exists and a probe file can be
    /// written into the cache directory under it. The fallback is returned
    /// unchecked; the store reports its own failure if it is unusable.
    pub fn resolve(&self) -> PathBuf {
        if let Some(preferred) = &self.preferred {
            if preferred.is_dir() {
                let candidate = self.join_name(preferred);
                if is_writable(&candidate) {
                    debug!(path = %candidate.display(), "Using preferred cache root");
                    return candidate;
                }
                warn!(
                    path = %candidate.display(),
                    "Preferred cache root is not writable, using fallback"
                );
            } else {
                debug!(path = %preferred.display(), "Preferred cache root not mounted");
            }
        }
        self.join_name(&self.fallback)
    }

    fn join_name(&self, root: &Path) -> PathBuf {
        if self.name.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&self.name)
        }
    }
}

fn is_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(PROBE_FILE);
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
