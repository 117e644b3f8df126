//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) / PORT env
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; codec tuning is applied once at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    CacheConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, ResponseMode,
    TimeoutConfig, TranscodeConfig, UpstreamConfig,
};
