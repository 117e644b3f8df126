//! Bridges between the async request task and the blocking codec thread.
//!
//! Both directions use bounded channels: a full channel parks the producer,
//! which is how backpressure reaches the origin socket and the encoder.

use std::io::{self, Write};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::ProxyError;
use crate::upstream::OriginBody;

/// Messages from the codec thread to the request task.
#[derive(Debug)]
pub enum CodecEvent {
    /// Encoded bytes, in order.
    Chunk(Bytes),
    /// Encoding finished; carries the total encoded size.
    Complete { encoded_len: u64 },
    /// The transcode failed; no further events follow.
    Failed(ProxyError),
}

/// Copy origin chunks into `tx` until the origin ends, fails, or the codec
/// stops listening. Dropping the origin stream closes the upstream socket.
pub async fn pump_origin(mut body: OriginBody, tx: mpsc::Sender<Result<Bytes, ProxyError>>) {
    while let Some(chunk) = body.next().await {
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() {
            tracing::debug!("Codec went away, dropping origin stream");
            return;
        }
        if failed {
            return;
        }
    }
}

/// `Write` adapter that forwards fixed-size chunks over a bounded channel.
///
/// Must only be used from a blocking thread. A closed channel surfaces as
/// `BrokenPipe`.
pub struct ChannelWriter {
    tx: mpsc::Sender<CodecEvent>,
    buf: BytesMut,
    chunk_size: usize,
    written: u64,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<CodecEvent>, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size: chunk_size.max(1),
            written: 0,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        let len = chunk.len() as u64;
        self.tx
            .blocking_send(CodecEvent::Chunk(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response receiver dropped"))?;
        self.written += len;
        Ok(())
    }

    /// Flush the tail and return the total number of bytes sent.
    pub fn finish(mut self) -> io::Result<u64> {
        self.send_buffered()?;
        Ok(self.written)
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}
