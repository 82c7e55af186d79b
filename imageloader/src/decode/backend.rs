//! Pixel decode backends.

use std::io::{self, Cursor};

use image::imageops::FilterType;
use image::{ImageError, ImageReader, Limits, RgbaImage};
use thiserror::Error;

use crate::config::DecodeConfig;

/// Why a backend could not decode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The data is malformed or truncated.
    #[error("corrupt image data: {0}")]
    Corrupt(String),

    /// The format is not recognised or not supported.
    #[error("unsupported image: {0}")]
    Unsupported(String),

    /// Decoding at this sample factor needs more memory than allowed.
    /// Retrying with a larger factor may succeed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Decodes encoded image bytes into pixels.
///
/// Both methods are called on blocking threads.
pub trait DecodeBackend: Send + Sync {
    /// Reads only the header and returns `(width, height)`.
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), BackendError>;

    /// Decodes at `1/sample` of the full resolution in each dimension.
    fn decode(&self, bytes: &[u8], sample: u32) -> Result<RgbaImage, BackendError>;
}

/// Backend over the `image` crate.
///
/// The `image` crate always decodes at full resolution, so the sample factor
/// only shrinks the buffer that is kept, not the peak allocation. Two checks
/// run before any decoding starts:
///
/// - the native RGBA buffer must fit in `max_alloc`. It does not depend on the
///   sample factor, so a miss is [`BackendError::Unsupported`] and is never
///   retried. A limit hit inside the decoder is reported the same way.
/// - the sampled result must fit in `pixel_budget` bytes of RGBA, otherwise
///   [`BackendError::ResourceExhausted`] asks for a coarser factor.
#[derive(Debug, Clone)]
pub struct ImageCrateBackend {
    max_alloc: u64,
    pixel_budget: u64,
}

impl ImageCrateBackend {
    pub fn new(config: &DecodeConfig) -> Self {
        Self {
            max_alloc: config.max_alloc_bytes,
            pixel_budget: config.pixel_budget_bytes,
        }
    }

    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BackendError::Corrupt(e.to_string()))?;
        if reader.format().is_none() {
            return Err(BackendError::Unsupported(
                "unrecognized image format".to_string(),
            ));
        }
        Ok(reader)
    }
}

impl Default for ImageCrateBackend {
    fn default() -> Self {
        Self::new(&DecodeConfig::default())
    }
}

impl DecodeBackend for ImageCrateBackend {
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), BackendError> {
        Self::reader(bytes)?
            .into_dimensions()
            .map_err(map_image_error)
    }

    fn decode(&self, bytes: &[u8], sample: u32) -> Result<RgbaImage, BackendError> {
        let (width, height) = self.dimensions(bytes)?;
        let sample = sample.max(1);
        let (target_w, target_h) = sampled_dimensions(width, height, sample);

        let native_bytes = u64::from(width) * u64::from(height) * 4;
        if native_bytes > self.max_alloc {
            return Err(BackendError::Unsupported(format!(
                "{}x{} needs {} bytes to decode, limit is {}",
                width, height, native_bytes, self.max_alloc
            )));
        }

        let target_bytes = u64::from(target_w) * u64::from(target_h) * 4;
        if target_bytes > self.pixel_budget {
            return Err(BackendError::ResourceExhausted(format!(
                "{}x{} at 1/{} needs {} bytes, budget is {}",
                width, height, sample, target_bytes, self.pixel_budget
            )));
        }

        let mut reader = Self::reader(bytes)?;
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        reader.limits(limits);

        let image = reader.decode().map_err(map_image_error)?;
        let image = if sample > 1 {
            image.resize_exact(target_w, target_h, FilterType::Triangle)
        } else {
            image
        };
        Ok(image.into_rgba8())
    }
}

/// Dimensions after subsampling, never below one pixel.
pub fn sampled_dimensions(width: u32, height: u32, sample: u32) -> (u32, u32) {
    let sample = sample.max(1);
    ((width / sample).max(1), (height / sample).max(1))
}

fn map_image_error(err: ImageError) -> BackendError {
    match err {
        ImageError::Limits(e) => {
            BackendError::Unsupported(format!("exceeds decode allocation limit: {}", e))
        }
        ImageError::Unsupported(e) => BackendError::Unsupported(e.to_string()),
        ImageError::IoError(e) if e.kind() == io::ErrorKind::OutOfMemory => {
            BackendError::ResourceExhausted(e.to_string())
        }
        other => BackendError::Corrupt(other.to_string()),
    }
}
