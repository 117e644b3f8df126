//! Transcode subsystem.
//!
//! # Data Flow
//! ```text
//! OriginBody
//!     → io.rs (pump into bounded input channel)
//!     → pipeline.rs (limiter permit, probe, plan, encode on a blocking thread)
//!     → codec.rs (decode / resize / grayscale / encode)
//!     → io.rs (ChannelWriter → bounded event channel)
//!     → Transcoded (buffered bytes or chunk stream)
//! ```
//!
//! # Design Decisions
//! - The codec runs on tokio's blocking pool, never on the async workers
//! - One concurrency limiter per process, sized once at startup
//! - The codec is a trait so the pipeline can be exercised without real images

pub mod codec;
pub mod io;
pub mod limiter;
pub mod pipeline;

pub use codec::{Codec, CodecError, ImageCodec, ImageInfo, TransformPlan};
pub use limiter::{CodecLimiter, CodecPermit};
pub use pipeline::{Stage, StageTracker, TranscodePipeline, Transcoded};
