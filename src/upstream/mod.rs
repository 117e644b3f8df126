//! Upstream (origin) access.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → fetcher.rs (outbound headers, redirect chase, deadlines)
//!     → origin.rs (OriginMeta + classification)
//!     → OriginResponse { meta, headers, body stream }
//! ```

pub mod fetcher;
pub mod origin;

pub use fetcher::{is_looped_request, Fetcher, OriginBody, OriginResponse, VIA};
pub use origin::{classify, Classification, OriginMeta};
