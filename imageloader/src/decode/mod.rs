//! Decode stage: bytes in, bounded RGBA image out.
//!
//! # Pipeline
//!
//! ```text
//!   FetchedSource ──► read bytes ──► bounds pass ──► sample factor
//!                                                        │
//!        ┌───────────────── ResourceExhausted ◄──── decode pass
//!        │  factor *= 2, pause, retry                    │
//!        └──────────────────────────────────────────►    ▼
//!                                                  post-transform
//!                                              (scale and/or rotate)
//! ```
//!
//! The sample factor keeps the decoded buffer near the requested bounds.
//! When memory runs short the factor doubles and the pass is retried after
//! a pause, up to `DecodeConfig::attempts` passes in total. A final
//! transform scales the result when it is still more than twice the bounds
//! and applies the orientation.

mod backend;
mod decoded;

use std::path::PathBuf;
use std::sync::Arc;

use ::image::imageops;
use ::image::imageops::FilterType;
use ::image::RgbaImage;
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DecodeConfig;
use crate::request::{Orientation, RequestDescriptor};
use crate::source::{ContentResolver, FetchedSource, CONTENT_SCHEME};

pub use self::backend::{sampled_dimensions, BackendError, DecodeBackend, ImageCrateBackend};
pub use self::decoded::DecodedImage;

#[cfg(test)]
pub use self::backend::tests::{png_bytes, PickyBackend};

/// Largest sample factor ever chosen from the bounds.
pub const MAX_SAMPLE_SIZE: u32 = 128;

/// Errors from the decode stage.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decode cancelled")]
    Cancelled,

    /// The fetched bytes could not be read back.
    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt image: {0}")]
    Corrupt(String),

    #[error("unsupported image: {0}")]
    Unsupported(String),

    /// A `content://` source with no resolver installed.
    #[error("no content resolver for {0}")]
    NoContentResolver(String),

    /// Every pass ran out of memory.
    #[error("out of memory after {attempts} decode attempts")]
    Exhausted { attempts: u32 },
}

impl From<BackendError> for DecodeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Corrupt(msg) | BackendError::ResourceExhausted(msg) => {
                DecodeError::Corrupt(msg)
            }
            BackendError::Unsupported(msg) => DecodeError::Unsupported(msg),
        }
    }
}

/// Picks the power-of-two-ish downsample factor for an image.
///
/// Returns 1 when the image already fits. Otherwise the ratio
/// `max(w / max_w, h / max_h)` (integer division) is capped at
/// [`MAX_SAMPLE_SIZE`], then rounded up to a power of two when it is at most
/// 8, or up to a multiple of 8 above that. A zero bound leaves that
/// dimension unbounded.
pub fn sample_size(width: u32, height: u32, max_width: u32, max_height: u32) -> u32 {
    let ratio_w = if max_width == 0 { 0 } else { width / max_width };
    let ratio_h = if max_height == 0 { 0 } else { height / max_height };
    let ratio = ratio_w.max(ratio_h);
    if ratio <= 1 {
        return 1;
    }

    let capped = ratio.min(MAX_SAMPLE_SIZE);
    if capped <= 8 {
        capped.next_power_of_two()
    } else {
        capped.div_ceil(8) * 8
    }
}

/// Scale that fits `width x height` inside the bounds (1.0 when unbounded).
pub fn fit_scale(width: u32, height: u32, max_width: u32, max_height: u32) -> f64 {
    let mut scale = 1.0_f64;
    if max_width > 0 && width > 0 {
        scale = scale.min(f64::from(max_width) / f64::from(width));
    }
    if max_height > 0 && height > 0 {
        scale = scale.min(f64::from(max_height) / f64::from(height));
    }
    scale
}

/// Decodes fetched bytes under the configured memory limits.
pub struct Decoder {
    backend: Arc<dyn DecodeBackend>,
    resolver: Option<Arc<dyn ContentResolver>>,
    config: DecodeConfig,
}

impl Decoder {
    pub fn new(
        backend: Arc<dyn DecodeBackend>,
        resolver: Option<Arc<dyn ContentResolver>>,
        config: DecodeConfig,
    ) -> Self {
        Self {
            backend,
            resolver,
            config,
        }
    }

    /// Decodes `source` to fit the descriptor's bounds and orientation.
    pub async fn decode(
        &self,
        source: FetchedSource,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<DecodedImage, DecodeError> {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        let (bytes, provided_orientation) = self.read_source(source, descriptor).await?;
        let orientation = provided_orientation.unwrap_or_else(|| descriptor.orientation());

        let backend = Arc::clone(&self.backend);
        let header = bytes.clone();
        let (width, height) = tokio::task::spawn_blocking(move || backend.dimensions(&header))
            .await
            .map_err(|e| DecodeError::Corrupt(format!("bounds task failed: {e}")))??;

        let mut sample = sample_size(width, height, descriptor.max_width(), descriptor.max_height());
        debug!(
            width,
            height,
            sample,
            max_width = descriptor.max_width(),
            max_height = descriptor.max_height(),
            "Bounds pass"
        );

        let attempts = self.config.attempts.max(1);
        let mut decoded = None;
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }

            let backend = Arc::clone(&self.backend);
            let data = bytes.clone();
            let outcome = tokio::task::spawn_blocking(move || backend.decode(&data, sample))
                .await
                .map_err(|e| DecodeError::Corrupt(format!("decode task failed: {e}")))?;

            match outcome {
                Ok(pixels) => {
                    decoded = Some(pixels);
                    break;
                }
                Err(BackendError::ResourceExhausted(reason)) => {
                    warn!(attempt, attempts, sample, reason = %reason, "Decode ran out of memory");
                    sample = sample.saturating_mul(2);
                    if attempt < attempts {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(DecodeError::Cancelled),
                            _ = tokio::time::sleep(self.config.retry_pause) => {}
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let pixels = decoded.ok_or(DecodeError::Exhausted { attempts })?;
        let (max_width, max_height) = (descriptor.max_width(), descriptor.max_height());
        let pixels = tokio::task::spawn_blocking(move || {
            post_transform(pixels, max_width, max_height, orientation)
        })
        .await
        .map_err(|e| DecodeError::Corrupt(format!("transform task failed: {e}")))?;

        Ok(DecodedImage::new(pixels))
    }

    async fn read_source(
        &self,
        source: FetchedSource,
        descriptor: &RequestDescriptor,
    ) -> Result<(Bytes, Option<Orientation>), DecodeError> {
        match source {
            FetchedSource::Memory(bytes) => Ok((bytes, None)),
            FetchedSource::Path(path) => Ok((read_file(path).await?, None)),
            FetchedSource::Uri(uri) => {
                if let Some(path) = uri.strip_prefix("file://") {
                    return Ok((read_file(PathBuf::from(path)).await?, None));
                }
                if !uri.starts_with(&format!("{}://", CONTENT_SCHEME)) {
                    return Err(DecodeError::Unsupported(format!("cannot open {}", uri)));
                }

                let resolver = self
                    .resolver
                    .clone()
                    .ok_or_else(|| DecodeError::NoContentResolver(uri.clone()))?;
                let thumbnail = descriptor.thumbnail_kind();
                let opened = tokio::task::spawn_blocking({
                    let uri = uri.clone();
                    move || resolver.open(&uri, thumbnail)
                })
                .await
                .map_err(|e| DecodeError::Corrupt(format!("resolver task failed: {e}")))?;

                let data = opened.map_err(|source| DecodeError::Unreadable {
                    path: PathBuf::from(&uri),
                    source,
                })?;
                Ok((data.bytes, data.orientation))
            }
        }
    }
}

async fn read_file(path: PathBuf) -> Result<Bytes, DecodeError> {
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(source) => Err(DecodeError::Unreadable { path, source }),
    }
}

/// Scales and rotates a decoded buffer.
///
/// Scaling happens when the image is still more than twice the bounds, or
/// when a rotation is needed anyway and the image exceeds the bounds at all.
pub fn post_transform(
    pixels: RgbaImage,
    max_width: u32,
    max_height: u32,
    orientation: Orientation,
) -> RgbaImage {
    let (width, height) = pixels.dimensions();
    let scale = fit_scale(width, height, max_width, max_height);
    let rotated = orientation.is_rotated();

    let pixels = if scale < 0.5 || (rotated && scale < 1.0) {
        let target_w = ((f64::from(width) * scale).round() as u32).max(1);
        let target_h = ((f64::from(height) * scale).round() as u32).max(1);
        debug!(width, height, target_w, target_h, "Post-scaling decoded image");
        imageops::resize(&pixels, target_w, target_h, FilterType::Triangle)
    } else {
        pixels
    };

    match orientation {
        Orientation::Normal => pixels,
        Orientation::Rotate90 => imageops::rotate90(&pixels),
        Orientation::Rotate180 => imageops::rotate180(&pixels),
        Orientation::Rotate270 => imageops::rotate270(&pixels),
    }
}
