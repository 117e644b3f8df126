//! Transcoded-result cache.
//!
//! The proxy only needs get / set-with-TTL / delete, so any key/value store
//! can sit behind [`ImageCache`]. [`MemoryCache`] is the in-process default.

pub mod memory;

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::policy::{OutputFormat, ProxyRequest};

pub use memory::MemoryCache;

/// Everything that changes the encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub url: String,
    pub quality: u8,
    pub grayscale: bool,
    pub format: OutputFormat,
}

impl CacheKey {
    pub fn for_request(req: &ProxyRequest) -> Self {
        Self {
            url: req.target_url.as_str().to_string(),
            quality: req.quality,
            grayscale: req.grayscale,
            format: OutputFormat::for_request(req),
        }
    }
}

/// A finished transcode, enough to rebuild the response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub format: OutputFormat,
    pub original_size: u64,
    pub body: Bytes,
}

pub trait ImageCache: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Option<CachedImage>>;

    fn set_with_ttl<'a>(&'a self, key: CacheKey, image: CachedImage, ttl: Duration) -> BoxFuture<'a, ()>;

    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, ()>;
}
