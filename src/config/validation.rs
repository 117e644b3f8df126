//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, quality 1-100, redirect cap)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// Hard ceiling on redirect hops chased by the fetcher.
pub const MAX_REDIRECT_HOPS: u8 = 4;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::new("listener.max_concurrent_requests", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let upstream = &config.upstream;
    if upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be > 0"));
    }
    if upstream.response_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.response_timeout_secs", "must be > 0"));
    }
    if upstream.body_idle_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.body_idle_timeout_secs", "must be > 0"));
    }
    if upstream.max_redirects > MAX_REDIRECT_HOPS {
        errors.push(ValidationError::new(
            "upstream.max_redirects",
            format!("must be <= {}", MAX_REDIRECT_HOPS),
        ));
    }

    let transcode = &config.transcode;
    if transcode.chunk_size == 0 {
        errors.push(ValidationError::new("transcode.chunk_size", "must be > 0"));
    }
    if transcode.channel_depth == 0 {
        errors.push(ValidationError::new("transcode.channel_depth", "must be > 0"));
    }
    if transcode.max_input_bytes == 0 {
        errors.push(ValidationError::new("transcode.max_input_bytes", "must be > 0"));
    }
    if !(1..=100).contains(&transcode.default_quality) {
        errors.push(ValidationError::new("transcode.default_quality", "must be within 1..=100"));
    }

    if config.cache.enabled && config.cache.ttl_secs == 0 {
        errors.push(ValidationError::new("cache.ttl_secs", "must be > 0 when the cache is enabled"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
