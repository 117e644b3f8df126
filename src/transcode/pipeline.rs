//! Streaming transcode: origin stream → codec → client stream.
//!
//! # States
//! ```text
//! Idle → MetadataPending → Transforming → Streaming → Completed
//!              │                │              │
//!              └────────────────┴──────────────┴────→ Failed
//! ```
//!
//! # Flow control
//! ```text
//! origin body ──pump task──▶ [input channel, depth N] ──▶ codec thread
//! codec thread ──ChannelWriter──▶ [event channel, depth N] ──▶ response body
//! ```
//! A slow client stops draining the event channel, which parks the encoder;
//! a slow codec stops draining the input channel, which parks the pump and
//! leaves origin bytes in the socket. The decoder needs the whole source, so
//! input is held in memory up to `transcode.max_input_bytes`.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ResponseMode, TranscodeConfig};
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::policy::{compute_resize_height, compute_resize_width, TranscodeParams};
use crate::transcode::codec::{Codec, CodecError, ImageInfo, TransformPlan};
use crate::transcode::io::{pump_origin, ChannelWriter, CodecEvent};
use crate::transcode::limiter::CodecLimiter;
use crate::upstream::OriginBody;

/// Source prefix inspected for early metadata; past this we wait for the full body.
const PROBE_WINDOW: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    MetadataPending,
    Transforming,
    Streaming,
    Completed,
    Failed,
}

impl Stage {
    fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Idle, MetadataPending)
                | (MetadataPending, Transforming)
                | (Transforming, Streaming)
                | (Streaming, Completed)
                | (MetadataPending | Transforming | Streaming, Failed)
        )
    }
}

/// Tracks one transcode through its states.
#[derive(Debug)]
pub struct StageTracker {
    stage: Stage,
}

impl StageTracker {
    pub fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    pub fn current(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transcode transition {:?} -> {:?}",
            self.stage,
            next
        );
        tracing::trace!(from = ?self.stage, to = ?next, "Transcode stage");
        self.stage = next;
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded output handed to the response composer.
pub enum Transcoded {
    /// Whole image; its length is final.
    Buffered(Bytes),
    /// Encoded chunks as produced. A mid-stream failure yields an error item,
    /// which must abort the response rather than end it cleanly.
    Streaming(BoxStream<'static, Result<Bytes, ProxyError>>),
}

impl std::fmt::Debug for Transcoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transcoded::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Transcoded::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, Copy)]
struct JobLimits {
    max_input_bytes: u64,
    max_input_pixels: Option<u64>,
    chunk_size: usize,
}

/// Shared, process-wide transcode machinery.
#[derive(Clone)]
pub struct TranscodePipeline {
    codec: Arc<dyn Codec>,
    limiter: CodecLimiter,
    config: TranscodeConfig,
}

impl TranscodePipeline {
    pub fn new(codec: Arc<dyn Codec>, config: TranscodeConfig) -> Self {
        let limiter = CodecLimiter::new(config.effective_concurrency());
        tracing::info!(
            concurrency = limiter.capacity(),
            response_mode = ?config.response_mode,
            max_input_bytes = config.max_input_bytes,
            "Transcode pipeline ready"
        );
        Self {
            codec,
            limiter,
            config,
        }
    }

    pub fn limiter(&self) -> &CodecLimiter {
        &self.limiter
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.config.response_mode
    }

    /// Transcode an origin body. Returns once the encoded output is ready to
    /// send (buffered mode) or its first chunk exists (chunked mode); any
    /// error returned here happened before the client saw a byte.
    pub async fn run(&self, body: OriginBody, params: TranscodeParams, origin_size: u64) -> Result<Transcoded, ProxyError> {
        let permit = self.limiter.acquire().await?;
        let started = Instant::now();

        let depth = self.config.channel_depth.max(1);
        let (input_tx, input_rx) = mpsc::channel(depth);
        let (event_tx, mut event_rx) = mpsc::channel(depth);

        let pump = AbortOnDrop(tokio::spawn(pump_origin(body, input_tx)));

        let codec = Arc::clone(&self.codec);
        let limits = JobLimits {
            max_input_bytes: self.config.max_input_bytes,
            max_input_pixels: self.config.max_input_pixels,
            chunk_size: self.config.chunk_size,
        };
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_job(codec.as_ref(), limits, params, origin_size, input_rx, event_tx);
        });

        match self.config.response_mode {
            ResponseMode::Buffered => {
                let mut out = BytesMut::new();
                while let Some(event) = event_rx.recv().await {
                    match event {
                        CodecEvent::Chunk(chunk) => out.extend_from_slice(&chunk),
                        CodecEvent::Complete { encoded_len } => {
                            debug_assert_eq!(encoded_len, out.len() as u64);
                            metrics::record_transcode(params.format.as_str(), started);
                            return Ok(Transcoded::Buffered(out.freeze()));
                        }
                        CodecEvent::Failed(err) => return Err(err),
                    }
                }
                Err(codec_vanished())
            }
            ResponseMode::Chunked => match event_rx.recv().await {
                Some(CodecEvent::Chunk(first)) => {
                    Ok(Transcoded::Streaming(stream_events(first, event_rx, pump, params, started)))
                }
                Some(CodecEvent::Complete { .. }) => {
                    metrics::record_transcode(params.format.as_str(), started);
                    Ok(Transcoded::Buffered(Bytes::new()))
                }
                Some(CodecEvent::Failed(err)) => Err(err),
                None => Err(codec_vanished()),
            },
        }
    }
}

fn codec_vanished() -> ProxyError {
    ProxyError::EncodeFailure("codec stopped without reporting completion".into())
}

/// Response body for chunked mode. Holds the pump guard so a dropped
/// response (client gone) also tears down the origin fetch.
fn stream_events(
    first: Bytes,
    rx: mpsc::Receiver<CodecEvent>,
    pump: AbortOnDrop,
    params: TranscodeParams,
    started: Instant,
) -> BoxStream<'static, Result<Bytes, ProxyError>> {
    let rest = stream::unfold(Some((rx, pump)), move |state| async move {
        let (mut rx, pump) = state?;
        match rx.recv().await {
            Some(CodecEvent::Chunk(chunk)) => Some((Ok(chunk), Some((rx, pump)))),
            Some(CodecEvent::Complete { encoded_len }) => {
                tracing::debug!(encoded_len, "Chunked transcode complete");
                metrics::record_transcode(params.format.as_str(), started);
                None
            }
            Some(CodecEvent::Failed(err)) => {
                tracing::warn!(error = %err, "Transcode failed after headers were sent, aborting response");
                Some((Err(err), None))
            }
            None => Some((Err(codec_vanished()), None)),
        }
    });
    stream::once(async move { Ok(first) }).chain(rest).boxed()
}

fn run_job(
    codec: &dyn Codec,
    limits: JobLimits,
    params: TranscodeParams,
    origin_size: u64,
    input: mpsc::Receiver<Result<Bytes, ProxyError>>,
    events: mpsc::Sender<CodecEvent>,
) {
    let mut stage = StageTracker::new();
    let event = match transcode_blocking(codec, limits, params, origin_size, input, &events, &mut stage) {
        Ok(encoded_len) => {
            stage.advance(Stage::Completed);
            CodecEvent::Complete { encoded_len }
        }
        Err(err) => {
            stage.advance(Stage::Failed);
            if matches!(err, ProxyError::ClientDisconnected) {
                tracing::debug!("Client went away during transcode");
            }
            CodecEvent::Failed(err)
        }
    };
    let _ = events.blocking_send(event);
}

fn transcode_blocking(
    codec: &dyn Codec,
    limits: JobLimits,
    params: TranscodeParams,
    origin_size: u64,
    mut input: mpsc::Receiver<Result<Bytes, ProxyError>>,
    events: &mpsc::Sender<CodecEvent>,
    stage: &mut StageTracker,
) -> Result<u64, ProxyError> {
    stage.advance(Stage::MetadataPending);

    let capacity = origin_size.min(limits.max_input_bytes) as usize;
    let mut source = Vec::with_capacity(capacity);
    let mut info: Option<ImageInfo> = None;

    while let Some(chunk) = input.blocking_recv() {
        if events.is_closed() {
            return Err(ProxyError::ClientDisconnected);
        }
        let chunk = chunk?;
        if (source.len() + chunk.len()) as u64 > limits.max_input_bytes {
            return Err(ProxyError::InputTooLarge {
                limit: limits.max_input_bytes,
            });
        }
        source.extend_from_slice(&chunk);

        if info.is_none() && source.len() <= PROBE_WINDOW {
            info = codec.probe(&source, false)?;
            if let Some(found) = &info {
                check_pixels(found, limits.max_input_pixels)?;
            }
        }
    }
    if events.is_closed() {
        return Err(ProxyError::ClientDisconnected);
    }

    let info = match info {
        Some(info) => info,
        None => codec
            .probe(&source, true)?
            .ok_or_else(|| ProxyError::DecodeFailure("unrecognised image data".into()))?,
    };
    check_pixels(&info, limits.max_input_pixels)?;
    tracing::debug!(
        width = info.width,
        height = info.height,
        native_format = info.format,
        source_len = source.len(),
        "Source image probed"
    );

    stage.advance(Stage::Transforming);
    let plan = TransformPlan {
        resize_width: compute_resize_width(info.width),
        resize_height: compute_resize_height(info.height),
        grayscale: params.grayscale,
        format: params.format,
        quality: params.quality,
    };

    let mut writer = ChannelWriter::new(events.clone(), limits.chunk_size);
    stage.advance(Stage::Streaming);
    codec.transform(&source, &plan, &mut writer)?;
    drop(source);

    writer
        .finish()
        .map_err(|e| ProxyError::from(CodecError::Output(e)))
}

fn check_pixels(info: &ImageInfo, max_pixels: Option<u64>) -> Result<(), ProxyError> {
    match max_pixels {
        Some(max) if info.pixels() > max => Err(ProxyError::DecodeFailure(format!(
            "{}x{} exceeds the {} pixel ceiling",
            info.width, info.height, max
        ))),
        _ => Ok(()),
    }
}
