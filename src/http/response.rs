//! Client-facing response composition.
//!
//! # Responsibilities
//! - Apply the cross-origin headers every response carries
//! - Passthrough: copy a fixed set of origin headers and relay the body verbatim
//! - Transcoded: content type, size accounting, `Content-Encoding: identity`
//!
//! # Design Decisions
//! - A composer is consumed by exactly one finalizer, so a response can
//!   never be finalized twice or have headers added after it started
//! - Bodies are streams; hyper polls them only as fast as the client drains,
//!   which is the downstream half of backpressure
//! - A body stream that fails after headers were sent aborts the connection

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::TryStreamExt;
use url::Url;

use crate::cache::CachedImage;
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::policy::OutputFormat;
use crate::transcode::Transcoded;
use crate::upstream::OriginResponse;

pub const X_ORIGINAL_SIZE: HeaderName = HeaderName::from_static("x-original-size");
pub const X_BYTES_SAVED: HeaderName = HeaderName::from_static("x-bytes-saved");
pub const X_PROXY_BYPASS: HeaderName = HeaderName::from_static("x-proxy-bypass");

const CROSS_ORIGIN_RESOURCE_POLICY: HeaderName = HeaderName::from_static("cross-origin-resource-policy");
const CROSS_ORIGIN_EMBEDDER_POLICY: HeaderName = HeaderName::from_static("cross-origin-embedder-policy");

/// Origin headers relayed on the passthrough path.
const PASSTHROUGH_HEADERS: [HeaderName; 4] = [
    header::ACCEPT_RANGES,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
];

/// Headers that must not leak onto a redirect.
const CACHING_HEADERS: [HeaderName; 4] = [
    header::CACHE_CONTROL,
    header::EXPIRES,
    header::DATE,
    header::ETAG,
];

/// Body served when the request names no target.
pub const PLACEHOLDER_BODY: &str = "bandwidth-hero-proxy";

/// Pending response headers for one request.
#[derive(Debug)]
pub struct ResponseComposer {
    headers: HeaderMap,
}

impl ResponseComposer {
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(CROSS_ORIGIN_RESOURCE_POLICY, HeaderValue::from_static("cross-origin"));
        headers.insert(CROSS_ORIGIN_EMBEDDER_POLICY, HeaderValue::from_static("unsafe-none"));
        Self { headers }
    }

    /// Relay the origin response unmodified.
    pub fn passthrough(mut self, origin: OriginResponse) -> Response {
        for name in PASSTHROUGH_HEADERS {
            if let Some(value) = origin.headers.get(&name) {
                self.headers.insert(name, value.clone());
            }
        }
        self.headers.insert(X_PROXY_BYPASS, HeaderValue::from_static("1"));

        let url = origin.url;
        let body = origin.body.inspect_err(move |err| {
            tracing::warn!(url = %url, error = %err, "Origin failed mid-relay, truncating response");
        });
        self.finish(origin.meta.status, Body::from_stream(body))
    }

    /// Send a transcoded image. Length headers are only set when the full
    /// encoded size is known.
    pub fn transcoded(mut self, format: OutputFormat, original_size: u64, output: Transcoded) -> Response {
        self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
        self.headers.insert(X_ORIGINAL_SIZE, HeaderValue::from(original_size));
        self.headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));

        let body = match output {
            Transcoded::Buffered(bytes) => {
                let encoded_size = bytes.len() as u64;
                let saved = original_size as i64 - encoded_size as i64;
                self.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(encoded_size));
                self.headers.insert(X_BYTES_SAVED, HeaderValue::from(saved));
                metrics::record_savings(original_size, encoded_size);
                tracing::debug!(original_size, encoded_size, saved, format = %format, "Serving transcoded image");
                Body::from(bytes)
            }
            Transcoded::Streaming(stream) => Body::from_stream(stream),
        };
        self.finish(StatusCode::OK, body)
    }

    /// Serve a previously transcoded image.
    pub fn cached(self, image: CachedImage) -> Response {
        self.transcoded(image.format, image.original_size, Transcoded::Buffered(image.body))
    }

    /// 302 to `location` with an empty body.
    pub fn redirect_to_origin(mut self, location: &Url) -> Response {
        for name in CACHING_HEADERS {
            self.headers.remove(name);
        }
        match HeaderValue::from_str(location.as_str()) {
            Ok(value) => {
                self.headers.insert(header::LOCATION, value);
            }
            Err(_) => return self.invalid_url(&ProxyError::InvalidUrl(location.to_string())),
        }
        self.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
        self.finish(StatusCode::FOUND, Body::empty())
    }

    /// 400 with a short plain-text body.
    pub fn invalid_url(mut self, err: &ProxyError) -> Response {
        self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.finish(StatusCode::BAD_REQUEST, Body::from(format!("Invalid URL: {}", err)))
    }

    /// The fixed reply for requests without a target.
    pub fn placeholder(self) -> Response {
        self.finish(StatusCode::OK, Body::from(Bytes::from_static(PLACEHOLDER_BODY.as_bytes())))
    }

    fn finish(self, status: StatusCode, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self::new()
    }
}
