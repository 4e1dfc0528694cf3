//! Image normalization: shrink and re-encode a source image to fit a byte
//! budget before upload.
//!
//! Two independent passes run in a fixed order:
//!
//! 1. **Dimension clamp**: the long edge is capped at `max_dimension`
//!    (800 px by default) and the short edge scaled to keep the aspect ratio.
//!    Images already within the cap keep their size; nothing is upscaled.
//! 2. **Re-encode**: the raster is written once as JPEG at a fixed quality
//!    (70 by default). If that single pass is over `max_bytes` the outcome is
//!    [`NormalizeError::SizeExceeded`]; quality is not lowered further.
//!
//! [`normalize`] is pure and blocking. [`prepare`] is the async entry point
//! the session uses: it runs `normalize` on the blocking pool and applies the
//! fallback policy (submit the original bytes on any failure).

use crate::config::EnhanceConfig;
use crate::error::NormalizeError;
use crate::pipeline::input::SourceImage;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, warn};

/// Media type of every successfully normalized image.
pub const OUTPUT_MEDIA_TYPE: &str = "image/jpeg";

/// The subset of [`EnhanceConfig`] the normalizer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub max_bytes: usize,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::from(&EnhanceConfig::default())
    }
}

impl From<&EnhanceConfig> for NormalizeOptions {
    fn from(config: &EnhanceConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_dimension: config.max_dimension,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// How the payload of a [`NormalizedImage`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Re-encoded by the normalizer as JPEG.
    Jpeg,
    /// The source bytes, untouched (fallback after a normalize failure).
    Original,
}

/// The image that is actually submitted.
///
/// Invariant: when `encoding` is [`Encoding::Jpeg`] the byte size is within
/// the budget it was normalized against. [`Encoding::Original`] marks the
/// explicit fallback, which carries no size guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    bytes: Bytes,
    media_type: String,
    encoding: Encoding,
    dimensions: Option<(u32, u32)>,
    name: Option<String>,
}

impl NormalizedImage {
    /// Use the source verbatim.
    pub fn original(source: &SourceImage) -> Self {
        Self {
            bytes: source.bytes().clone(),
            media_type: source.media_type().to_string(),
            encoding: Encoding::Original,
            dimensions: None,
            name: source.name().map(str::to_string),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Output dimensions, known only for re-encoded images.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn is_fallback(&self) -> bool {
        self.encoding == Encoding::Original
    }

    /// File name for the upload part.
    pub fn file_name(&self) -> String {
        let stem = self
            .name
            .as_deref()
            .and_then(|n| std::path::Path::new(n).file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        match self.encoding {
            Encoding::Jpeg => format!("{stem}.jpg"),
            Encoding::Original => self.name.clone().unwrap_or(stem),
        }
    }
}

/// Outcome of [`prepare`]: the image to submit plus the reason a fallback
/// happened, if one did.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub image: NormalizedImage,
    pub fallback: Option<NormalizeError>,
}

/// Target size for the dimension clamp.
///
/// The long edge (width on ties) is capped at `cap`; the other edge is
/// scaled proportionally, rounded, and never below 1.
pub fn target_dimensions(width: u32, height: u32, cap: u32) -> (u32, u32) {
    let cap = cap.max(1);
    let scale = |edge: u32, long: u32| -> u32 {
        let scaled = (edge as u64 * cap as u64 + long as u64 / 2) / long as u64;
        (scaled as u32).max(1)
    };

    if width >= height {
        if width > cap {
            (cap, scale(height, width))
        } else {
            (width, height)
        }
    } else if height > cap {
        (scale(width, height), cap)
    } else {
        (width, height)
    }
}

/// Decode, clamp and re-encode `source` within `opts.max_bytes`.
///
/// Blocking and CPU-bound; call from `spawn_blocking` in async code.
pub fn normalize(
    source: &SourceImage,
    opts: &NormalizeOptions,
) -> Result<NormalizedImage, NormalizeError> {
    let img = decode(source.bytes())?;
    let (width, height) = img.dimensions();
    let (target_w, target_h) = target_dimensions(width, height, opts.max_dimension);

    let img = if (target_w, target_h) != (width, height) {
        debug!("Resizing {}x{} → {}x{}", width, height, target_w, target_h);
        img.resize_exact(target_w, target_h, FilterType::Triangle)
    } else {
        img
    };

    let encoded = encode_jpeg(&img, opts.jpeg_quality)?;
    debug!(
        "Re-encoded {} bytes → {} bytes (budget {})",
        source.len(),
        encoded.len(),
        opts.max_bytes
    );

    if encoded.len() > opts.max_bytes {
        return Err(NormalizeError::SizeExceeded {
            size: encoded.len(),
            max: opts.max_bytes,
        });
    }

    Ok(NormalizedImage {
        bytes: Bytes::from(encoded),
        media_type: OUTPUT_MEDIA_TYPE.to_string(),
        encoding: Encoding::Jpeg,
        dimensions: Some((target_w, target_h)),
        name: source.name().map(str::to_string),
    })
}

/// Normalize on the blocking pool, falling back to the original bytes.
///
/// Never fails: decode and size problems are logged and recovered here so
/// they never reach the user.
pub async fn prepare(source: &SourceImage, opts: NormalizeOptions) -> Prepared {
    let owned = source.clone();
    let outcome = tokio::task::spawn_blocking(move || normalize(&owned, &opts))
        .await
        .unwrap_or_else(|e| {
            Err(NormalizeError::DecodeFailed {
                detail: format!("normalize task panicked: {e}"),
            })
        });

    match outcome {
        Ok(image) => Prepared {
            image,
            fallback: None,
        },
        Err(err) => {
            warn!("Normalization failed, submitting original bytes: {}", err);
            Prepared {
                image: NormalizedImage::original(source),
                fallback: Some(err),
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, NormalizeError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| NormalizeError::DecodeFailed {
            detail: e.to_string(),
        })?
        .decode()
        .map_err(|e| NormalizeError::DecodeFailed {
            detail: e.to_string(),
        })
}

/// JPEG has no alpha channel, so the raster is flattened to RGB first.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, NormalizeError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| NormalizeError::DecodeFailed {
            detail: format!("re-encode failed: {e}"),
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn encoded(img: DynamicImage, format: ImageFormat) -> SourceImage {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        SourceImage::from_bytes(buf)
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn target_dimensions_landscape() {
        assert_eq!(target_dimensions(5000, 3000, 800), (800, 480));
        assert_eq!(target_dimensions(1600, 900, 800), (800, 450));
    }

    #[test]
    fn target_dimensions_portrait() {
        assert_eq!(target_dimensions(600, 1200, 800), (400, 800));
        assert_eq!(target_dimensions(3000, 5000, 800), (480, 800));
    }

    #[test]
    fn target_dimensions_square_uses_width_branch() {
        assert_eq!(target_dimensions(1000, 1000, 800), (800, 800));
    }

    #[test]
    fn target_dimensions_never_upscales() {
        assert_eq!(target_dimensions(640, 480, 800), (640, 480));
        assert_eq!(target_dimensions(800, 200, 800), (800, 200));
        assert_eq!(target_dimensions(1, 1, 800), (1, 1));
    }

    #[test]
    fn target_dimensions_extreme_aspect_keeps_one_pixel() {
        assert_eq!(target_dimensions(10_000, 1, 800), (800, 1));
        assert_eq!(target_dimensions(1, 10_000, 800), (1, 800));
    }

    #[test]
    fn normalize_large_photo_fits_budget() {
        let source = encoded(gradient(5000, 3000), ImageFormat::Bmp);
        let out = normalize(&source, &NormalizeOptions::default()).unwrap();

        assert_eq!(out.encoding(), Encoding::Jpeg);
        assert_eq!(out.media_type(), "image/jpeg");
        assert_eq!(out.dimensions(), Some((800, 480)));
        assert!(out.byte_size() <= 512_000, "got {} bytes", out.byte_size());
        assert_eq!(image::guess_format(out.bytes()).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn normalize_small_image_keeps_dimensions() {
        let source = encoded(gradient(120, 60), ImageFormat::Png);
        let out = normalize(&source, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.dimensions(), Some((120, 60)));
        assert!(!out.is_fallback());
    }

    #[test]
    fn normalize_flattens_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 16, Rgba([0, 0, 255, 128])));
        let out = normalize(&encoded(img, ImageFormat::Png), &NormalizeOptions::default()).unwrap();
        assert_eq!(out.dimensions(), Some((32, 16)));
    }

    #[test]
    fn normalize_rejects_garbage() {
        let source = SourceImage::from_bytes(b"GIF? no. just text".to_vec());
        let err = normalize(&source, &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::DecodeFailed { .. }));
    }

    #[test]
    fn normalize_reports_size_exceeded() {
        let source = encoded(gradient(400, 300), ImageFormat::Png);
        let opts = NormalizeOptions {
            max_bytes: 64,
            ..NormalizeOptions::default()
        };
        match normalize(&source, &opts) {
            Err(NormalizeError::SizeExceeded { size, max }) => {
                assert_eq!(max, 64);
                assert!(size > 64);
            }
            other => panic!("expected SizeExceeded, got {other:?}"),
        }
    }

    #[test]
    fn file_name_follows_encoding() {
        let source = encoded(gradient(10, 10), ImageFormat::Png).with_name("holiday.png");
        let out = normalize(&source, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.file_name(), "holiday.jpg");
        assert_eq!(NormalizedImage::original(&source).file_name(), "holiday.png");
    }

    #[tokio::test]
    async fn prepare_falls_back_to_original_bytes() {
        let source = encoded(gradient(400, 300), ImageFormat::Png);
        let opts = NormalizeOptions {
            max_bytes: 64,
            ..NormalizeOptions::default()
        };

        let prepared = prepare(&source, opts).await;
        assert!(matches!(
            prepared.fallback,
            Some(NormalizeError::SizeExceeded { .. })
        ));
        assert!(prepared.image.is_fallback());
        assert_eq!(prepared.image.bytes(), source.bytes());
        assert_eq!(prepared.image.media_type(), "image/png");
    }

    #[tokio::test]
    async fn prepare_undecodable_passes_through() {
        let source = SourceImage::new(b"\x00\x01\x02".to_vec(), "image/heic");
        let prepared = prepare(&source, NormalizeOptions::default()).await;
        assert!(matches!(
            prepared.fallback,
            Some(NormalizeError::DecodeFailed { .. })
        ));
        assert_eq!(prepared.image.bytes().as_ref(), b"\x00\x01\x02");
        assert_eq!(prepared.image.media_type(), "image/heic");
    }
}
