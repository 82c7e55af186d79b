//! Where decodable bytes come from.

use std::fmt;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;

use crate::request::{Orientation, ThumbnailKind};

/// URI scheme for local files.
pub const FILE_SCHEME: &str = "file";

/// URI scheme for content-provider documents.
pub const CONTENT_SCHEME: &str = "content";

/// Output of the fetch stage.
#[derive(Clone, PartialEq, Eq)]
pub enum FetchedSource {
    /// A file on local disk: a store entry or a local path.
    Path(PathBuf),

    /// Body held in memory, used when the byte store is disabled.
    Memory(Bytes),

    /// A `file://` or `content://` URI, resolved by the decoder.
    Uri(String),
}

impl fmt::Debug for FetchedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchedSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            FetchedSource::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            FetchedSource::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
        }
    }
}

/// Bytes opened through a [`ContentResolver`].
#[derive(Debug, Clone)]
pub struct ContentData {
    pub bytes: Bytes,

    /// Rotation the provider recorded for the document, if any. Overrides
    /// the descriptor's hint.
    pub orientation: Option<Orientation>,
}

impl ContentData {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }
}

/// Opens `content://` documents.
///
/// Implementations are called from a blocking thread and may do I/O.
/// `thumbnail` is set when the request asked for a device-provided
/// thumbnail of that kind instead of the full document.
pub trait ContentResolver: Send + Sync {
    fn open(&self, uri: &str, thumbnail: Option<ThumbnailKind>) -> io::Result<ContentData>;
}
