//! Listener notifications.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::decode::DecodedImage;
use crate::error::LoadError;
use crate::request::RequestDescriptor;

/// One notification about a submitted request.
///
/// A request sees at most one `Started` followed by exactly one terminal
/// event (`Succeeded`, `Failed` or `Cancelled`). A memory-cache hit skips
/// `Started`.
#[derive(Clone)]
pub enum LoadEvent {
    Started,
    Succeeded(Arc<DecodedImage>),
    Failed(LoadError),
    Cancelled,
}

impl LoadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadEvent::Started)
    }
}

impl fmt::Debug for LoadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadEvent::Started => f.write_str("Started"),
            LoadEvent::Succeeded(image) => {
                write!(f, "Succeeded({}x{})", image.width(), image.height())
            }
            LoadEvent::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            LoadEvent::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Receives [`LoadEvent`]s.
///
/// Called from loader threads with no internal lock held. Implementations
/// should return quickly; heavy work belongs on the receiver's own executor.
pub trait LoadListener: Send + Sync + 'static {
    fn on_event(&self, descriptor: &RequestDescriptor, event: LoadEvent);
}

impl<F> LoadListener for F
where
    F: Fn(&RequestDescriptor, LoadEvent) + Send + Sync + 'static,
{
    fn on_event(&self, descriptor: &RequestDescriptor, event: LoadEvent) {
        self(descriptor, event)
    }
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelListener(pub UnboundedSender<LoadEvent>);

impl LoadListener for ChannelListener {
    fn on_event(&self, _descriptor: &RequestDescriptor, event: LoadEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.0.send(event);
    }
}

/// Immediate outcome of `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Answered from the memory cache; `Succeeded` was already delivered.
    CacheHit,
    /// A new task was created; `Started` was already delivered.
    Started,
    /// Attached to a task already in flight for the same key.
    Joined,
    /// The loader is shut down; `Cancelled` was already delivered.
    Rejected,
}
