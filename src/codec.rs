//! Image conversion.
//!
//! [`ImageCodec`] is the narrow seam between the proxy and pixel work: raw
//! source bytes plus [`TransformParams`] in, encoded target bytes out.
//! [`WebpCodec`] is the production implementation built on the `image` crate.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::{KrofiError, Result};

/// Media type of everything the proxy serves.
pub const WEBP_MEDIA_TYPE: &str = "image/webp";

/// Largest blur sigma accepted from a request.
pub const MAX_BLUR_SIGMA: f32 = 50.0;

/// Default bound on either side of a resized image.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

/// Output-affecting transform parameters.
///
/// Every field here changes the converted bytes, so every field is part of
/// the cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Target width in pixels. With only `width` set the aspect ratio is kept.
    pub width: Option<u32>,
    /// Target height in pixels. With only `height` set the aspect ratio is kept.
    pub height: Option<u32>,
    /// Gaussian blur sigma.
    pub blur: Option<f32>,
    /// Convert to grayscale.
    #[serde(default)]
    pub grayscale: bool,
}

impl TransformParams {
    /// `true` when the image is converted without any transform.
    pub fn is_identity(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.blur.is_none() && !self.grayscale
    }

    /// Reject parameters the codec should never be asked to honour.
    pub fn validate(&self, max_dimension: u32) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            match value {
                Some(0) => {
                    return Err(KrofiError::InvalidRequest(format!(
                        "{name} must be greater than 0"
                    )))
                }
                Some(v) if v > max_dimension => {
                    return Err(KrofiError::InvalidRequest(format!(
                        "{name} must be at most {max_dimension}"
                    )))
                }
                _ => {}
            }
        }
        if let Some(sigma) = self.blur {
            if !sigma.is_finite() || sigma <= 0.0 || sigma > MAX_BLUR_SIGMA {
                return Err(KrofiError::InvalidRequest(format!(
                    "blur must be in (0, {MAX_BLUR_SIGMA}]"
                )));
            }
        }
        Ok(())
    }
}

/// Converts a source image into the served format.
///
/// Implementations are CPU-bound and synchronous; callers run them on the
/// blocking pool.
pub trait ImageCodec: Send + Sync {
    /// Media type of the produced bytes.
    fn media_type(&self) -> &'static str;

    /// Decode `source`, apply `params`, and encode.
    fn transcode(&self, source: &[u8], params: &TransformParams) -> Result<Vec<u8>>;
}

/// Lossless WebP encoder backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct WebpCodec {
    filter: FilterType,
    max_dimension: u32,
}

impl WebpCodec {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    /// Use a different resampling filter for resizes.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Bound on the side derived from a single-dimension resize.
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    fn apply(&self, mut img: DynamicImage, params: &TransformParams) -> Result<DynamicImage> {
        let (src_w, src_h) = (img.width().max(1), img.height().max(1));
        img = match (params.width, params.height) {
            (Some(w), Some(h)) => img.resize(w, h, self.filter),
            (Some(w), None) => {
                let h = self.derived_dimension("height", src_h, w, src_w)?;
                img.resize_exact(w, h, self.filter)
            }
            (None, Some(h)) => {
                let w = self.derived_dimension("width", src_w, h, src_h)?;
                img.resize_exact(w, h, self.filter)
            }
            (None, None) => img,
        };
        if let Some(sigma) = params.blur {
            img = img.blur(sigma);
        }
        if params.grayscale {
            img = img.grayscale();
        }
        Ok(img)
    }

    /// Scale `other` by `target / source`, rejecting results above the bound
    /// before any pixel buffer is allocated.
    fn derived_dimension(&self, name: &str, other: u32, target: u32, source: u32) -> Result<u32> {
        let derived = scale_dimension(other, target, source);
        if derived > self.max_dimension {
            return Err(KrofiError::InvalidRequest(format!(
                "resized {name} {derived} exceeds the maximum of {}",
                self.max_dimension
            )));
        }
        Ok(derived)
    }
}

impl Default for WebpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for WebpCodec {
    fn media_type(&self) -> &'static str {
        WEBP_MEDIA_TYPE
    }

    fn transcode(&self, source: &[u8], params: &TransformParams) -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(source)
            .map_err(|e| KrofiError::Codec(format!("failed to decode source image: {e}")))?;
        let transformed = self.apply(decoded, params)?;

        // The WebP encoder only takes 8-bit layouts.
        let rgba = DynamicImage::ImageRgba8(transformed.to_rgba8());
        let mut out = Vec::new();
        rgba.write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)
            .map_err(|e| KrofiError::Codec(format!("failed to encode WebP: {e}")))?;
        Ok(out)
    }
}

/// `other * target / source`, rounded, never below 1.
fn scale_dimension(other: u32, target: u32, source: u32) -> u32 {
    let scaled = (u64::from(other) * u64::from(target) + u64::from(source) / 2) / u64::from(source);
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

// ============================================================================
// Tests
// ============================================================================
