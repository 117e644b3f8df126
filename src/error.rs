//! Failure taxonomy for the request pipeline.
//!
//! Every failure maps to exactly one client-visible outcome:
//! - `InvalidUrl` → 400 with a plain-text body (there is nowhere to redirect to)
//! - `ClientDisconnected` → nothing is written
//! - everything else → 302 back to the origin URL (or to the origin's own
//!   `Location` for [`ProxyError::UpstreamRedirect`])
//!
//! Once response headers have left, none of these can be turned into a new
//! response; the body stream is aborted instead.

use axum::http::StatusCode;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid target url: {0}")]
    InvalidUrl(String),

    #[error("origin responded with client error {0}")]
    UpstreamClientError(StatusCode),

    #[error("origin responded with server error {0}")]
    UpstreamServerError(StatusCode),

    #[error("origin redirected to {0}")]
    UpstreamRedirect(Url),

    #[error("origin unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("origin did not respond in time")]
    UpstreamTimeout,

    #[error("failed to decode image: {0}")]
    DecodeFailure(String),

    #[error("failed to encode image: {0}")]
    EncodeFailure(String),

    #[error("origin body exceeds {limit} bytes")]
    InputTooLarge { limit: u64 },

    #[error("client disconnected")]
    ClientDisconnected,
}

/// What the error handler should do with a failure raised before headers were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// 400 with a short plain-text body.
    BadRequest,
    /// 302 to the given location.
    Redirect(Url),
    /// Nobody is listening; write nothing.
    Abandon,
}

impl ProxyError {
    /// Resolve the client-visible outcome. `origin` is the target URL of the request.
    pub fn disposition(&self, origin: &Url) -> Disposition {
        match self {
            ProxyError::InvalidUrl(_) => Disposition::BadRequest,
            ProxyError::ClientDisconnected => Disposition::Abandon,
            ProxyError::UpstreamRedirect(location) => Disposition::Redirect(location.clone()),
            _ => Disposition::Redirect(origin.clone()),
        }
    }

    /// Short label used for the `outcome` metric and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidUrl(_) => "invalid_url",
            ProxyError::UpstreamClientError(_) => "upstream_client_error",
            ProxyError::UpstreamServerError(_) => "upstream_server_error",
            ProxyError::UpstreamRedirect(_) => "upstream_redirect",
            ProxyError::UpstreamUnavailable(_) => "upstream_unavailable",
            ProxyError::UpstreamTimeout => "upstream_timeout",
            ProxyError::DecodeFailure(_) => "decode_failure",
            ProxyError::EncodeFailure(_) => "encode_failure",
            ProxyError::InputTooLarge { .. } => "input_too_large",
            ProxyError::ClientDisconnected => "client_disconnected",
        }
    }

    /// Classify an origin status code of 400 or above.
    pub fn from_upstream_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            ProxyError::UpstreamServerError(status)
        } else {
            ProxyError::UpstreamClientError(status)
        }
    }
}
