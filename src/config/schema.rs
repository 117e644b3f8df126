//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the image proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, request ceiling).
    pub listener: ListenerConfig,

    /// Inbound request deadlines.
    pub timeouts: TimeoutConfig,

    /// Outbound fetch settings.
    pub upstream: UpstreamConfig,

    /// Process-wide codec tuning.
    pub transcode: TranscodeConfig,

    /// Optional transcoded-result cache.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum requests handled concurrently (backpressure).
    pub max_concurrent_requests: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_concurrent_requests: 1024,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for producing response headers, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Outbound fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time allowed for the origin to send response headers, in seconds.
    pub response_timeout_secs: u64,

    /// Longest gap tolerated between two origin body chunks, in seconds.
    pub body_idle_timeout_secs: u64,

    /// Redirect hops chased by the proxy itself before surfacing the
    /// last `Location` to the client. 0 surfaces the first redirect.
    pub max_redirects: u8,

    /// User-Agent sent to origins.
    pub user_agent: String,

    /// Redirect looped-back requests (our own `Via` from loopback) to origin.
    pub loop_guard: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            response_timeout_secs: 15,
            body_idle_timeout_secs: 30,
            max_redirects: 0,
            user_agent: "Bandwidth-Hero Compressor".to_string(),
            loop_guard: true,
        }
    }
}

/// How encoded bytes are delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Collect the encoded image, then send it with `Content-Length` and `X-Bytes-Saved`.
    #[default]
    Buffered,
    /// Stream encoded chunks as they are produced; length headers are omitted.
    Chunked,
}

/// Codec tuning, applied once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Simultaneous transcodes allowed (0 = available parallelism).
    pub concurrency: usize,

    /// Largest origin body the codec accepts, in bytes.
    pub max_input_bytes: u64,

    /// Optional decoded pixel-count ceiling.
    pub max_input_pixels: Option<u64>,

    /// Size of encoded chunks handed to the client, in bytes.
    pub chunk_size: usize,

    /// Chunks buffered between each pipeline stage.
    pub channel_depth: usize,

    /// Buffered or chunked delivery.
    pub response_mode: ResponseMode,

    /// Quality used when the request carries no `l` parameter.
    pub default_quality: u8,
}

impl TranscodeConfig {
    /// Effective transcode concurrency for this host.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            max_input_bytes: 32 * 1024 * 1024,
            max_input_pixels: None,
            chunk_size: 16 * 1024,
            channel_depth: 4,
            response_mode: ResponseMode::Buffered,
            default_quality: 40,
        }
    }
}

/// Transcoded-result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the in-process cache.
    pub enabled: bool,

    /// Entry lifetime in seconds.
    pub ttl_secs: u64,

    /// Maximum number of live entries.
    pub max_entries: usize,

    /// Encoded images larger than this are not stored.
    pub max_entry_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 3600,
            max_entries: 1024,
            max_entry_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
