//! Pure transcode decisions.

use std::fmt;

use crate::policy::params::ProxyRequest;
use crate::upstream::OriginMeta;

/// Origins smaller than this are relayed as-is on the WebP path.
pub const MIN_COMPRESS_LENGTH: u64 = 1024;

/// PNG/GIF origins smaller than this are relayed as-is on the JPEG path.
pub const MIN_TRANSPARENT_COMPRESS_LENGTH: u64 = MIN_COMPRESS_LENGTH * 100;

/// Tallest image the WebP encoder accepts.
pub const MAX_OUTPUT_HEIGHT: u32 = 16383;

/// Widest image the WebP encoder accepts.
pub const MAX_OUTPUT_WIDTH: u32 = 16383;

pub const DEFAULT_QUALITY: u8 = 40;

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Webp,
    Jpeg,
}

impl OutputFormat {
    pub fn for_request(req: &ProxyRequest) -> Self {
        if req.wants_webp {
            OutputFormat::Webp
        } else {
            OutputFormat::Jpeg
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder settings derived from the request. Resize is decided later,
/// once the codec has reported the image height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeParams {
    pub format: OutputFormat,
    pub grayscale: bool,
    pub quality: u8,
}

impl TranscodeParams {
    pub fn from_request(req: &ProxyRequest) -> Self {
        Self {
            format: OutputFormat::for_request(req),
            grayscale: req.grayscale,
            quality: req.quality,
        }
    }
}

/// Decide whether an origin response is worth transcoding.
pub fn should_compress(meta: &OriginMeta, req: &ProxyRequest) -> bool {
    let Some(mime) = meta.mime_essence() else {
        return false;
    };
    if !mime.starts_with("image/") {
        return false;
    }
    if meta.content_length == 0 {
        return false;
    }
    // Transcoding cannot honour byte ranges.
    if req.is_range_request() {
        return false;
    }
    if req.wants_webp && meta.content_length < MIN_COMPRESS_LENGTH {
        return false;
    }
    if !req.wants_webp
        && (mime.ends_with("png") || mime.ends_with("gif"))
        && meta.content_length < MIN_TRANSPARENT_COMPRESS_LENGTH
    {
        return false;
    }
    true
}

/// Height to shrink to, if the image is taller than the encoder allows.
/// Never enlarges.
pub fn compute_resize_height(origin_height: u32) -> Option<u32> {
    (origin_height > MAX_OUTPUT_HEIGHT).then_some(MAX_OUTPUT_HEIGHT)
}

/// Width to shrink to, if the image is wider than the encoder allows.
pub fn compute_resize_width(origin_width: u32) -> Option<u32> {
    (origin_width > MAX_OUTPUT_WIDTH).then_some(MAX_OUTPUT_WIDTH)
}

pub fn clamp_quality(raw: i64) -> u8 {
    raw.clamp(1, 100) as u8
}
