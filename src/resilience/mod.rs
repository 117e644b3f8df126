//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to origin:
//!     → timeouts.rs (connect deadline on the client, response deadline per fetch)
//!     → timeouts.rs (idle deadline between body chunks)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Nothing is retried; the client can always fall back to the origin URL

pub mod timeouts;
