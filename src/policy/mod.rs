//! Request policy: what the client asked for and whether we act on it.
//!
//! # Data Flow
//! ```text
//! query + headers
//!     → params.rs (ProxyRequest, or placeholder when `url` is missing)
//!     → [fetcher populates OriginMeta]
//!     → decision.rs (should_compress, output format, quality)
//!     → [codec reports height] → compute_resize_height
//! ```
//!
//! Everything here is pure and evaluated once per request.

pub mod decision;
pub mod params;

pub use decision::{
    clamp_quality, compute_resize_height, compute_resize_width, should_compress, OutputFormat, TranscodeParams,
    MAX_OUTPUT_HEIGHT, MAX_OUTPUT_WIDTH,
};
pub use params::{parse_params, ForwardedHeaders, ProxyRequest};
