//! Image codec seam.
//!
//! The pipeline only talks to [`Codec`]; [`ImageCodec`] is the production
//! implementation on top of the `image` crate (decode, resize, grayscale,
//! JPEG) and `webp` (lossy WebP).

use std::io::{Cursor, Write};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError, ImageReader};
use thiserror::Error;

use crate::error::ProxyError;
use crate::policy::OutputFormat;

/// Bytes needed before a failed format sniff is conclusive.
const SNIFF_LEN: usize = 16;

/// Dimensions and native format reported by a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
}

impl ImageInfo {
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// What to do to the decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformPlan {
    /// Bounding box for a downscale; the aspect ratio is kept.
    pub resize_width: Option<u32>,
    pub resize_height: Option<u32>,
    pub grayscale: bool,
    pub format: OutputFormat,
    pub quality: u8,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decode: {0}")]
    Decode(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<CodecError> for ProxyError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decode(msg) => ProxyError::DecodeFailure(msg),
            CodecError::Encode(msg) => ProxyError::EncodeFailure(msg),
            CodecError::Output(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                ProxyError::ClientDisconnected
            }
            CodecError::Output(e) => ProxyError::EncodeFailure(e.to_string()),
        }
    }
}

pub trait Codec: Send + Sync + 'static {
    /// Inspect the first bytes of a source image.
    ///
    /// `Ok(None)` means more bytes are needed. When `complete` is true the
    /// whole source is present and the answer must be definitive.
    fn probe(&self, head: &[u8], complete: bool) -> Result<Option<ImageInfo>, CodecError>;

    /// Decode `source`, apply `plan` and write the encoded image to `out`.
    /// Only the first frame of animated sources is used.
    fn transform(&self, source: &[u8], plan: &TransformPlan, out: &mut dyn Write) -> Result<(), CodecError>;
}

/// [`Codec`] backed by the `image` and `webp` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode(source: &[u8]) -> Result<DynamicImage, CodecError> {
        let mut reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        // Pixel ceilings are enforced by the pipeline from probe results.
        reader.no_limits();
        reader.decode().map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl Codec for ImageCodec {
    fn probe(&self, head: &[u8], complete: bool) -> Result<Option<ImageInfo>, CodecError> {
        let format = match image::guess_format(head) {
            Ok(format) => format,
            Err(_) if !complete && head.len() < SNIFF_LEN => return Ok(None),
            Err(e) => return Err(CodecError::Decode(e.to_string())),
        };

        match ImageReader::with_format(Cursor::new(head), format).into_dimensions() {
            Ok((width, height)) => Ok(Some(ImageInfo {
                width,
                height,
                format: format.extensions_str().first().copied().unwrap_or("unknown"),
            })),
            Err(_) if !complete => Ok(None),
            Err(e) => Err(CodecError::Decode(e.to_string())),
        }
    }

    fn transform(&self, source: &[u8], plan: &TransformPlan, out: &mut dyn Write) -> Result<(), CodecError> {
        let mut img = Self::decode(source)?;

        let width = plan.resize_width.filter(|&w| w < img.width()).unwrap_or(img.width());
        let height = plan.resize_height.filter(|&h| h < img.height()).unwrap_or(img.height());
        if (width, height) != (img.width(), img.height()) {
            img = img.resize(width, height, FilterType::Lanczos3);
        }
        if plan.grayscale {
            img = img.grayscale();
        }

        match plan.format {
            OutputFormat::Jpeg => {
                let (buf, color) = if plan.grayscale {
                    (img.to_luma8().into_raw(), ExtendedColorType::L8)
                } else {
                    (img.to_rgb8().into_raw(), ExtendedColorType::Rgb8)
                };
                JpegEncoder::new_with_quality(out, plan.quality)
                    .write_image(&buf, img.width(), img.height(), color)
                    .map_err(|e| match e {
                        ImageError::IoError(io) => CodecError::Output(io),
                        other => CodecError::Encode(other.to_string()),
                    })
            }
            OutputFormat::Webp => {
                let prepared = if img.color().has_alpha() {
                    DynamicImage::ImageRgba8(img.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(img.to_rgb8())
                };
                let encoder = webp::Encoder::from_image(&prepared)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
                let encoded = encoder
                    .encode_simple(false, plan.quality as f32)
                    .map_err(|e| CodecError::Encode(format!("webp: {:?}", e)))?;
                out.write_all(&encoded)?;
                Ok(())
            }
        }
    }
}
