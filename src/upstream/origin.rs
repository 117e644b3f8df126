//! Origin response metadata and classification.

use axum::http::{header, HeaderMap, StatusCode};
use url::Url;

use crate::error::ProxyError;

/// What the origin told us before any body byte was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginMeta {
    pub content_type: Option<String>,
    /// 0 when absent or unparseable.
    pub content_length: u64,
    pub status: StatusCode,
    pub location: Option<String>,
}

impl OriginMeta {
    pub fn from_parts(status: StatusCode, headers: &HeaderMap) -> Self {
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        Self {
            content_type: text(header::CONTENT_TYPE),
            content_length: text(header::CONTENT_LENGTH)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            status,
            location: text(header::LOCATION),
        }
    }

    /// Lower-cased `type/subtype` without parameters.
    pub fn mime_essence(&self) -> Option<String> {
        let raw = self.content_type.as_deref()?;
        let essence = raw.split(';').next().unwrap_or(raw).trim();
        (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
    }
}

/// How the fetcher should treat an origin response.
#[derive(Debug)]
pub enum Classification {
    /// Hand the body to the next stage.
    Success,
    /// 3xx with a usable `Location`, resolved against the requested URL.
    Redirect(Url),
    /// 4xx/5xx.
    Failure(ProxyError),
}

pub fn classify(meta: &OriginMeta, requested: &Url) -> Classification {
    if meta.status.as_u16() >= 400 {
        return Classification::Failure(ProxyError::from_upstream_status(meta.status));
    }
    if meta.status.is_redirection() {
        if let Some(location) = meta.location.as_deref().and_then(|l| requested.join(l).ok()) {
            return Classification::Redirect(location);
        }
    }
    Classification::Success
}
