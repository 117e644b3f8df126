//! Process-wide bound on simultaneous transcodes.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ProxyError;
use crate::observability::metrics;

/// FIFO-fair limiter shared by every request.
#[derive(Debug, Clone)]
pub struct CodecLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl CodecLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a slot. The slot is returned when the permit drops,
    /// whichever way the transcode ends.
    pub async fn acquire(&self) -> Result<CodecPermit, ProxyError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProxyError::EncodeFailure("codec limiter closed".into()))?;
        metrics::transcode_started();
        Ok(CodecPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A held transcode slot.
#[derive(Debug)]
pub struct CodecPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for CodecPermit {
    fn drop(&mut self) {
        metrics::transcode_finished();
    }
}
