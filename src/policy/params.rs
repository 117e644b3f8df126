//! Inbound query parsing.
//!
//! `GET /?url=<percent-encoded>&jpeg=<any>&bw=<0|1>&l=<1-100>`

use axum::http::{header, HeaderMap, HeaderValue};
use url::Url;

use crate::error::ProxyError;
use crate::policy::decision::clamp_quality;

/// Headers copied from the inbound request onto the origin fetch.
#[derive(Debug, Clone, Default)]
pub struct ForwardedHeaders {
    pub cookie: Option<HeaderValue>,
    pub dnt: Option<HeaderValue>,
    pub referer: Option<HeaderValue>,
    pub range: Option<HeaderValue>,
}

impl ForwardedHeaders {
    fn from_inbound(headers: &HeaderMap) -> Self {
        Self {
            cookie: headers.get(header::COOKIE).cloned(),
            dnt: headers.get(header::DNT).cloned(),
            referer: headers.get(header::REFERER).cloned(),
            range: headers.get(header::RANGE).cloned(),
        }
    }

    /// Allow-listed headers as `(name, value)` pairs, skipping absent ones.
    pub fn iter(&self) -> impl Iterator<Item = (header::HeaderName, &HeaderValue)> {
        [
            (header::COOKIE, self.cookie.as_ref()),
            (header::DNT, self.dnt.as_ref()),
            (header::REFERER, self.referer.as_ref()),
            (header::RANGE, self.range.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// A validated proxy request. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target_url: Url,
    pub wants_webp: bool,
    pub grayscale: bool,
    pub quality: u8,
    pub forwarded: ForwardedHeaders,
    /// Inbound `X-Forwarded-For`, if the client sent one.
    pub forwarded_for: Option<HeaderValue>,
    /// Inbound `Via`, used by the loop guard.
    pub via: Option<HeaderValue>,
}

impl ProxyRequest {
    /// True when the client asked for a byte range.
    pub fn is_range_request(&self) -> bool {
        self.forwarded.range.is_some()
    }
}

/// Parse the inbound query and headers.
///
/// Returns `Ok(None)` when no `url` parameter is present; the caller answers
/// with the placeholder body and performs no fetch.
pub fn parse_params(
    query: Option<&str>,
    headers: &HeaderMap,
    default_quality: u8,
) -> Result<Option<ProxyRequest>, ProxyError> {
    let mut urls = Vec::new();
    let mut jpeg = false;
    let mut bw = None;
    let mut level = None;

    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "url" => urls.push(value.into_owned()),
            "jpeg" => jpeg = true,
            "bw" => bw = Some(value.into_owned()),
            "l" => level = Some(value.into_owned()),
            _ => {}
        }
    }

    // An unescaped `&url=` inside the target splits it into several values.
    let raw = urls.join("&url=");
    if raw.is_empty() {
        return Ok(None);
    }

    let target_url = parse_target(&strip_carrier_prefix(&raw))?;

    let grayscale = match bw {
        Some(value) => value.trim().parse::<i64>().map_or(true, |v| v != 0),
        None => true,
    };

    let quality = level
        .and_then(|l| l.trim().parse::<i64>().ok())
        .filter(|&l| l != 0)
        .map(clamp_quality)
        .unwrap_or_else(|| clamp_quality(default_quality as i64));

    Ok(Some(ProxyRequest {
        target_url,
        wants_webp: !jpeg,
        grayscale,
        quality,
        forwarded: ForwardedHeaders::from_inbound(headers),
        forwarded_for: headers.get("x-forwarded-for").cloned(),
        via: headers.get(header::VIA).cloned(),
    }))
}

/// Parse an absolute http(s) URL.
pub fn parse_target(raw: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(raw.trim()).map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(ProxyError::InvalidUrl(format!("{}: expected an http(s) url", raw))),
    }
}

/// Undo carrier "bmi" proxies that wrap the real target as
/// `http://1.1.X.Y/bmi/[scheme://]host/...`.
fn strip_carrier_prefix(raw: &str) -> String {
    let Some(rest) = raw.strip_prefix("http://1.1.") else {
        return raw.to_string();
    };
    let Some((a, tail)) = rest.split_once('.') else {
        return raw.to_string();
    };
    let Some((b, after)) = tail.split_once('/') else {
        return raw.to_string();
    };
    let is_digit = |s: &str| s.len() == 1 && s.chars().all(|c| c.is_ascii_digit());
    if !is_digit(a) || !is_digit(b) {
        return raw.to_string();
    }
    let Some(wrapped) = after
        .strip_prefix("bmi/")
        .or_else(|| after.strip_prefix("BMI/"))
    else {
        return raw.to_string();
    };
    let wrapped = wrapped
        .strip_prefix("https://")
        .or_else(|| wrapped.strip_prefix("http://"))
        .unwrap_or(wrapped);
    format!("http://{}", wrapped)
}
