//! Request descriptors and the cache keys derived from them.
//!
//! A [`RequestDescriptor`] names one image load: where the bytes come from,
//! the bounds the decoded image must fit in, and an orientation hint. Its
//! [`CacheKey`] is derived from the source (plus the thumbnail kind, when
//! present) and is used both as the in-memory cache key and as the on-disk
//! file name.
//!
//! # Key Format
//!
//! The key is the first eight bytes of the SHA-256 digest of the unique id,
//! read big-endian. File names are the key in lowercase hex without padding.
//!
//! ```
//! use imageloader::request::RequestDescriptor;
//!
//! let a = RequestDescriptor::new("https://example.com/cat.jpg", 256, 256);
//! let b = RequestDescriptor::new("https://example.com/cat.jpg", 256, 256);
//! assert_eq!(a, b);
//! assert_eq!(a.cache_key(), b.cache_key());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};

/// Stable identifier for a request, shared by the memory and disk caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Derives a key from a unique id string.
    pub fn from_unique_id(unique_id: &str) -> Self {
        let digest = Sha256::digest(unique_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    /// Returns the raw key value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the on-disk file name for this key.
    pub fn file_name(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Kind of device-provided thumbnail.
///
/// Each kind carries fixed target bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbnailKind {
    /// 512×384 thumbnail.
    Mini,
    /// 128×128 thumbnail.
    Micro,
}

impl ThumbnailKind {
    /// Returns the (width, height) bounds for this kind.
    pub fn bounds(&self) -> (u32, u32) {
        match self {
            ThumbnailKind::Mini => (512, 384),
            ThumbnailKind::Micro => (128, 128),
        }
    }

    /// Returns the discriminant used in key derivation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailKind::Mini => "mini",
            ThumbnailKind::Micro => "micro",
        }
    }
}

impl fmt::Display for ThumbnailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clockwise rotation to apply after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Orientation {
    /// Converts a rotation in degrees, snapping to the nearest quarter turn.
    ///
    /// Negative and out-of-range values are normalised, so `-90` is
    /// `Rotate270` and `450` is `Rotate90`.
    pub fn from_degrees(degrees: i32) -> Self {
        match ((degrees.rem_euclid(360) + 45) / 90) % 4 {
            1 => Orientation::Rotate90,
            2 => Orientation::Rotate180,
            3 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// Returns the rotation in degrees.
    pub fn degrees(&self) -> u32 {
        match self {
            Orientation::Normal => 0,
            Orientation::Rotate90 => 90,
            Orientation::Rotate180 => 180,
            Orientation::Rotate270 => 270,
        }
    }

    /// Returns true if a rotation is required.
    pub fn is_rotated(&self) -> bool {
        *self != Orientation::Normal
    }
}

/// Immutable description of one image load.
///
/// Two descriptors are equal when their bounds and cache key match. The
/// orientation hint does not take part in equality.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    source: String,
    max_width: u32,
    max_height: u32,
    orientation: Orientation,
    thumbnail: Option<ThumbnailKind>,
    key: CacheKey,
}

impl RequestDescriptor {
    /// Creates a descriptor for a URL or local path.
    ///
    /// A bound of zero leaves that dimension unbounded.
    pub fn new(source: impl Into<String>, max_width: u32, max_height: u32) -> Self {
        let source = source.into();
        let key = CacheKey::from_unique_id(&source);
        Self {
            source,
            max_width,
            max_height,
            orientation: Orientation::Normal,
            thumbnail: None,
            key,
        }
    }

    /// Creates a descriptor for a device thumbnail of the given kind.
    ///
    /// The bounds come from the kind, and the kind takes part in the key so
    /// a mini and a micro thumbnail of the same source never collide.
    pub fn thumbnail(source: impl Into<String>, kind: ThumbnailKind) -> Self {
        let source = source.into();
        let (max_width, max_height) = kind.bounds();
        let key = CacheKey::from_unique_id(&format!("{}#thumbnail={}", source, kind));
        Self {
            source,
            max_width,
            max_height,
            orientation: Orientation::Normal,
            thumbnail: Some(kind),
            key,
        }
    }

    /// Sets the orientation hint.
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Returns the source URL or path.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the maximum decoded width (0 = unbounded).
    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    /// Returns the maximum decoded height (0 = unbounded).
    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn thumbnail_kind(&self) -> Option<ThumbnailKind> {
        self.thumbnail
    }

    /// Returns the derived cache key.
    pub fn cache_key(&self) -> CacheKey {
        self.key
    }
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.max_width == other.max_width
            && self.max_height == other.max_height
            && self.key == other.key
    }
}

impl Eq for RequestDescriptor {}

impl Hash for RequestDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.max_width.hash(state);
        self.max_height.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}, {}°",
            self.source,
            self.max_width,
            self.max_height,
            self.orientation.degrees()
        )?;
        if let Some(kind) = self.thumbnail {
            write!(f, ", {} thumbnail", kind)?;
        }
        write!(f, ")")
    }
}
