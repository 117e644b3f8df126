//! Outbound fetch to the origin.
//!
//! # Responsibilities
//! - Forward only allow-listed inbound headers plus synthesized
//!   `User-Agent`, `X-Forwarded-For` and `Via`
//! - Chase at most `upstream.max_redirects` hops, then surface the last
//!   `Location` to the client
//! - Never carry the client's `Cookie` to a different origin
//! - Classify the response and expose the body as an unbuffered stream

use std::net::IpAddr;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::policy::ProxyRequest;
use crate::resilience::timeouts::{idle_timeout, with_deadline};
use crate::upstream::origin::{classify, Classification, OriginMeta};

/// Marker sent on every outbound request and checked on inbound ones.
pub const VIA: &str = "1.1 bandwidth-hero";

/// Origin body, chunk by chunk, in arrival order.
pub type OriginBody = BoxStream<'static, Result<Bytes, ProxyError>>;

/// A successful origin response whose body has not been read yet.
pub struct OriginResponse {
    pub meta: OriginMeta,
    pub headers: HeaderMap,
    /// The URL that produced this response, after any chased redirects.
    pub url: Url,
    pub body: OriginBody,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("meta", &self.meta)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// HTTP client for origin fetches. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: HeaderValue,
    response_timeout: Duration,
    body_idle_timeout: Duration,
    max_redirects: u8,
}

impl Fetcher {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("client setup: {}", e)))?;

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("Bandwidth-Hero Compressor"));

        Ok(Self {
            client,
            user_agent,
            response_timeout: Duration::from_secs(config.response_timeout_secs),
            body_idle_timeout: Duration::from_secs(config.body_idle_timeout_secs),
            max_redirects: config.max_redirects,
        })
    }

    /// Headers for the outbound request.
    pub fn outbound_headers(&self, req: &ProxyRequest, peer: IpAddr) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in req.forwarded.iter() {
            headers.insert(name, value.clone());
        }
        headers.insert(header::USER_AGENT, self.user_agent.clone());

        let forwarded_for = req.forwarded_for.clone().unwrap_or_else(|| {
            HeaderValue::from_str(&peer.to_string()).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        });
        headers.insert("x-forwarded-for", forwarded_for);
        headers.insert(header::VIA, HeaderValue::from_static(VIA));
        headers
    }

    /// Fetch `req.target_url`, returning once response headers are in.
    pub async fn fetch(&self, req: &ProxyRequest, peer: IpAddr) -> Result<OriginResponse, ProxyError> {
        let mut headers = self.outbound_headers(req, peer);
        let mut url = req.target_url.clone();
        let mut hops = 0u8;

        loop {
            let send = self.client.get(url.clone()).headers(headers.clone()).send();
            let response = with_deadline(self.response_timeout, async {
                send.await.map_err(map_reqwest_error)
            })
            .await?;

            let meta = OriginMeta::from_parts(response.status(), response.headers());
            tracing::debug!(
                url = %url,
                status = %meta.status,
                content_type = ?meta.content_type,
                content_length = meta.content_length,
                "Origin responded"
            );

            match classify(&meta, &url) {
                Classification::Failure(err) => return Err(err),
                Classification::Redirect(location) if hops < self.max_redirects => {
                    hops += 1;
                    tracing::debug!(from = %url, to = %location, hop = hops, "Following origin redirect");
                    prepare_hop(&mut headers, &url, &location);
                    url = location;
                }
                Classification::Redirect(location) => return Err(ProxyError::UpstreamRedirect(location)),
                Classification::Success => {
                    let headers = response.headers().clone();
                    let body = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(|e| ProxyError::UpstreamUnavailable(e.to_string())));
                    return Ok(OriginResponse {
                        meta,
                        headers,
                        url,
                        body: idle_timeout(body, self.body_idle_timeout, || ProxyError::UpstreamTimeout),
                    });
                }
            }
        }
    }
}

/// Adjust outbound headers for a redirect hop from `from` to `to`.
fn prepare_hop(headers: &mut HeaderMap, from: &Url, to: &Url) {
    if from.origin() != to.origin() {
        headers.remove(header::COOKIE);
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProxyError {
    if err.is_builder() {
        ProxyError::InvalidUrl(err.to_string())
    } else if err.is_timeout() {
        ProxyError::UpstreamTimeout
    } else {
        ProxyError::UpstreamUnavailable(err.to_string())
    }
}

/// Best-effort guard against the proxy fetching through itself: the request
/// already carries our `Via` marker and comes from loopback.
pub fn is_looped_request(req: &ProxyRequest, peer: IpAddr) -> bool {
    let carries_marker = req
        .via
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(VIA));
    if !carries_marker {
        return false;
    }

    let forwarding_ip = req
        .forwarded_for
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer);
    forwarding_ip.is_loopback()
}
