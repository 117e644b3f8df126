//! Failure handling for requests that have not produced a response yet.
//!
//! # Responsibilities
//! - Turn a pipeline failure into the single client-visible outcome
//! - Redirect the client to the origin so it can fetch the image itself
//!
//! # Design Decisions
//! - Only failures raised before a response exists come through here; a
//!   response that has started streaming is aborted by its body instead
//! - The failure carries the URL the origin was last fetched from, so a
//!   followed redirect sends the client to the final location

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use url::Url;

use crate::error::{Disposition, ProxyError};
use crate::http::response::ResponseComposer;
use crate::observability::metrics;

/// Status recorded for requests whose client went away.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// A failed request and the origin URL it was working on.
#[derive(Debug)]
pub struct Failure {
    pub error: ProxyError,
    pub origin: Url,
}

impl Failure {
    pub fn new(error: ProxyError, origin: Url) -> Self {
        Self { error, origin }
    }
}

/// Produce the response for `failure`.
pub fn respond_to_failure(failure: Failure) -> Response {
    let Failure { error, origin } = failure;
    metrics::record_request(error.kind());

    match error.disposition(&origin) {
        Disposition::BadRequest => {
            tracing::warn!(error = %error, "Rejecting request");
            ResponseComposer::new().invalid_url(&error)
        }
        Disposition::Redirect(location) => {
            tracing::warn!(
                error = %error,
                kind = error.kind(),
                location = %location,
                "Falling back to origin"
            );
            ResponseComposer::new().redirect_to_origin(&location)
        }
        Disposition::Abandon => {
            tracing::debug!("Client went away before the response started");
            let mut response = Response::new(Body::empty());
            *response.status_mut() =
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST);
            response
        }
    }
}
