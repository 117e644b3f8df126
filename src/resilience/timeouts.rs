//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap origin calls with a response deadline
//! - Bound the gap between consecutive origin body chunks
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out fetches degrade to a redirect-to-origin, never a hang

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::ProxyError;

/// Await `fut`, failing with [`ProxyError::UpstreamTimeout`] after `limit`.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::UpstreamTimeout),
    }
}

/// End `inner` with `on_idle()` if no item arrives within `idle`.
///
/// The stream is fused after the first error.
pub fn idle_timeout<S, T, E>(inner: S, idle: Duration, on_idle: fn() -> E) -> BoxStream<'static, Result<T, E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    stream::unfold(Some(inner.boxed()), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(Ok(item))) => Some((Ok(item), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(e), None)),
            Ok(None) => None,
            Err(_) => Some((Err(on_idle()), None)),
        }
    })
    .boxed()
}
