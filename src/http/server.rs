//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum router and wire up middleware (request ID, tracing,
//!   global concurrency limit)
//! - Hold the process-wide state: fetcher, transcode pipeline, cache
//! - Drive each request from query parsing to a finished response
//! - Serve until the shutdown signal fires, then drain
//!
//! # Data Flow
//! ```text
//! GET /?url=...&jpeg=...&bw=...&l=...
//!     → parse_params (placeholder / 400)
//!     → loop guard (302 to origin)
//!     → cache lookup (hit → transcoded response)
//!     → Fetcher::fetch (error → 302)
//!     → should_compress ? TranscodePipeline::run : passthrough
//! ```
//!
//! # Design Decisions
//! - `timeouts.request_secs` bounds everything up to the response headers;
//!   running out is an origin timeout and redirects like any other failure

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, Uri},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::cache::{CacheKey, CachedImage, ImageCache, MemoryCache};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::redirect::{respond_to_failure, Failure};
use crate::http::request::{make_request_span, MakeRequestUuid};
use crate::http::response::ResponseComposer;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::policy::{parse_params, should_compress, OutputFormat, ProxyRequest, TranscodeParams};
use crate::resilience::timeouts::with_deadline;
use crate::transcode::{Codec, ImageCodec, TranscodePipeline, Transcoded};
use crate::upstream::{is_looped_request, Fetcher};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub fetcher: Fetcher,
    pub pipeline: TranscodePipeline,
    pub cache: Option<Arc<dyn ImageCache>>,
}

/// HTTP server for the image proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
}

impl HttpServer {
    /// Create a server with the production codec.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        Self::with_codec(config, Arc::new(ImageCodec::new()))
    }

    /// Create a server around a specific codec implementation.
    pub fn with_codec(config: ProxyConfig, codec: Arc<dyn Codec>) -> Result<Self, ProxyError> {
        let config = Arc::new(config);
        let fetcher = Fetcher::new(&config.upstream)?;
        let pipeline = TranscodePipeline::new(codec, config.transcode.clone());
        let cache: Option<Arc<dyn ImageCache>> = if config.cache.enabled {
            tracing::info!(
                ttl_secs = config.cache.ttl_secs,
                max_entries = config.cache.max_entries,
                "Transcode cache enabled"
            );
            Some(Arc::new(MemoryCache::new(&config.cache)))
        } else {
            None
        };

        let state = AppState {
            config: Arc::clone(&config),
            fetcher,
            pipeline,
            cache,
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_concurrent_requests));

        Router::new()
            .route("/", get(proxy_handler))
            .route("/favicon.ico", get(favicon))
            .with_state(state)
            .layer(middleware)
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then let in-flight requests finish.
    pub async fn run(self, listener: TcpListener, mut shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Main proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let req = match parse_params(uri.query(), &headers, state.config.transcode.default_quality) {
        Ok(Some(req)) => req,
        Ok(None) => {
            metrics::record_request("placeholder");
            return ResponseComposer::new().placeholder();
        }
        Err(error) => {
            tracing::warn!(error = %error, query = ?uri.query(), "Rejecting request");
            metrics::record_request(error.kind());
            return ResponseComposer::new().invalid_url(&error);
        }
    };

    tracing::debug!(
        url = %req.target_url,
        webp = req.wants_webp,
        grayscale = req.grayscale,
        quality = req.quality,
        "Proxying image"
    );

    if state.config.upstream.loop_guard && is_looped_request(&req, peer.ip()) {
        tracing::warn!(url = %req.target_url, peer = %peer, "Request looped back through the proxy");
        metrics::record_request("loop_guard");
        return ResponseComposer::new().redirect_to_origin(&req.target_url);
    }

    let deadline = Duration::from_secs(state.config.timeouts.request_secs);
    let served = with_deadline(deadline, async { Ok(serve_image(&state, &req, peer.ip()).await) }).await;

    match served {
        Ok(Ok((outcome, response))) => {
            metrics::record_request(outcome);
            response
        }
        Ok(Err(failure)) => respond_to_failure(failure),
        Err(error) => {
            tracing::warn!(url = %req.target_url, deadline_secs = deadline.as_secs(), "Request deadline elapsed");
            respond_to_failure(Failure::new(error, req.target_url.clone()))
        }
    }
}

/// Fetch the origin and decide between passthrough and transcode.
async fn serve_image(
    state: &AppState,
    req: &ProxyRequest,
    peer: IpAddr,
) -> Result<(&'static str, Response), Failure> {
    // Range responses are partial; never cache them.
    let cache_key = match &state.cache {
        Some(_) if !req.is_range_request() => Some(CacheKey::for_request(req)),
        _ => None,
    };
    if let (Some(cache), Some(key)) = (&state.cache, &cache_key) {
        if let Some(image) = cache.get(key).await {
            tracing::debug!(url = %req.target_url, "Serving transcoded image from cache");
            return Ok(("cache_hit", ResponseComposer::new().cached(image)));
        }
    }

    let origin = state
        .fetcher
        .fetch(req, peer)
        .await
        .map_err(|error| Failure::new(error, req.target_url.clone()))?;

    if !should_compress(&origin.meta, req) {
        tracing::debug!(
            url = %origin.url,
            content_type = ?origin.meta.content_type,
            content_length = origin.meta.content_length,
            "Passing origin response through"
        );
        return Ok(("bypass", ResponseComposer::new().passthrough(origin)));
    }

    let params = TranscodeParams::from_request(req);
    let format = OutputFormat::for_request(req);
    let original_size = origin.meta.content_length;
    let origin_url = origin.url.clone();

    let output = state
        .pipeline
        .run(origin.body, params, original_size)
        .await
        .map_err(|error| Failure::new(error, origin_url))?;

    // Only the bytes may live across the store; the chunk stream is not `Sync`.
    let buffered = match &output {
        Transcoded::Buffered(body) => Some(body.clone()),
        Transcoded::Streaming(_) => None,
    };
    if let (Some(body), Some(cache), Some(key)) = (buffered, &state.cache, cache_key) {
        let image = CachedImage {
            format,
            original_size,
            body,
        };
        cache
            .set_with_ttl(key, image, Duration::from_secs(state.config.cache.ttl_secs))
            .await;
    }

    Ok(("transcoded", ResponseComposer::new().transcoded(format, original_size, output)))
}
