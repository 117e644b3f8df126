//! Shared utilities for integration tests: a mock origin and a proxy launcher.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::net::TcpListener;

use bandwidth_hero_proxy::config::ProxyConfig;
use bandwidth_hero_proxy::http::HttpServer;
use bandwidth_hero_proxy::lifecycle::Shutdown;

/// Deterministic noisy picture: a gradient with pseudo-random grain, so
/// encoders can neither collapse it nor blow it up.
pub fn photo(width: u32, height: u32) -> RgbImage {
    let mut seed: u32 = 0x2545_f491;
    RgbImage::from_fn(width, height, |x, y| {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let grain = (seed >> 24) as u8 / 2;
        let r = ((x * 255) / width.max(1)) as u8;
        let g = ((y * 255) / height.max(1)) as u8;
        Rgb([r.saturating_add(grain), g.saturating_add(grain), 128u8.saturating_add(grain)])
    })
}

pub fn encode(img: RgbImage, format: ImageFormat) -> Bytes {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
    Bytes::from(out.into_inner())
}

pub fn encode_jpeg(img: RgbImage, quality: u8) -> Bytes {
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    DynamicImage::ImageRgb8(img).write_with_encoder(encoder).unwrap();
    Bytes::from(out)
}

#[derive(Clone)]
struct OriginState {
    png: Bytes,
    jpeg: Bytes,
    tiny: Bytes,
    small: Bytes,
    hits: Arc<AtomicUsize>,
    last_headers: Arc<Mutex<Option<HeaderMap>>>,
}

impl OriginState {
    fn record(&self, headers: &HeaderMap) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        *self.last_headers.lock().unwrap() = Some(headers.clone());
    }
}

/// A running mock origin.
///
/// Paths:
/// - `/photo.png`, `/photo.jpg`: large images (byte ranges honoured)
/// - `/tiny.png`: an image below the compression threshold
/// - `/small.png`: above the compression threshold, below the one for
///   transparent formats on the JPEG path
/// - `/page.html`: not an image
/// - `/missing`: 404
/// - `/moved`: 301 to `/photo.png`
/// - `/bounce?to=<url>`: 302 to an absolute URL
/// - `/stall`: headers and one chunk, then silence
pub struct MockOrigin {
    pub addr: SocketAddr,
    pub png: Bytes,
    pub jpeg: Bytes,
    pub tiny: Bytes,
    pub small: Bytes,
    hits: Arc<AtomicUsize>,
    last_headers: Arc<Mutex<Option<HeaderMap>>>,
}

impl MockOrigin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.last_headers.lock().unwrap().clone()
    }
}

pub async fn start_origin() -> MockOrigin {
    let state = OriginState {
        png: encode(photo(256, 256), ImageFormat::Png),
        jpeg: encode_jpeg(photo(256, 256), 95),
        tiny: encode(photo(4, 4), ImageFormat::Png),
        small: encode(photo(64, 64), ImageFormat::Png),
        hits: Arc::new(AtomicUsize::new(0)),
        last_headers: Arc::new(Mutex::new(None)),
    };

    let app = Router::new()
        .route("/photo.png", get(photo_png))
        .route("/photo.jpg", get(photo_jpg))
        .route("/tiny.png", get(tiny_png))
        .route("/small.png", get(small_png))
        .route("/page.html", get(page))
        .route("/missing", get(missing))
        .route("/moved", get(moved))
        .route("/bounce", get(bounce))
        .route("/stall", get(stall))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockOrigin {
        addr,
        png: state.png,
        jpeg: state.jpeg,
        tiny: state.tiny,
        small: state.small,
        hits: state.hits,
        last_headers: state.last_headers,
    }
}

fn image_response(body: Bytes, content_type: &'static str, headers: &HeaderMap) -> Response {
    let total = body.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(start, end)| Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?)));

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, "\"origin-etag\"")
        .header(header::CACHE_CONTROL, "max-age=3600");

    match range {
        Some((start, end)) if start <= end && end < total => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total))
            .body(Body::from(body.slice(start..=end)))
            .unwrap(),
        _ => builder.status(StatusCode::OK).body(Body::from(body)).unwrap(),
    }
}

async fn photo_png(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    image_response(state.png.clone(), "image/png", &headers)
}

async fn photo_jpg(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    image_response(state.jpeg.clone(), "image/jpeg", &headers)
}

async fn tiny_png(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    image_response(state.tiny.clone(), "image/png", &headers)
}

async fn small_png(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    image_response(state.small.clone(), "image/png", &headers)
}

async fn page(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    Response::builder()
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from("<html><body>".repeat(200)))
        .unwrap()
}

async fn missing(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from("not found"))
        .unwrap()
}

async fn moved(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(header::LOCATION, "/photo.png")
        .body(Body::empty())
        .unwrap()
}

async fn bounce(
    State(state): State<OriginState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record(&headers);
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, query.get("to").cloned().unwrap_or_default())
        .body(Body::empty())
        .unwrap()
}

async fn stall(State(state): State<OriginState>, headers: HeaderMap) -> Response {
    state.record(&headers);
    let head = state.png.slice(..1000);
    let body = stream::iter(vec![Ok::<_, std::io::Error>(head)]).chain(stream::pending());
    Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CONTENT_LENGTH, HeaderValue::from(state.png.len()))
        .body(Body::from_stream(body))
        .unwrap()
}

/// Config tuned for tests: loopback bind, short timeouts.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.response_timeout_secs = 5;
    config.upstream.body_idle_timeout_secs = 1;
    config.transcode.concurrency = 2;
    config
}

/// A running proxy. Dropping it does not stop the server; call `shutdown`.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl RunningProxy {
    pub fn url(&self, query: &str) -> String {
        format!("http://{}/{}", self.addr, query)
    }
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let server = HttpServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    RunningProxy { addr, shutdown }
}

/// Client that never follows redirects and ignores proxy env vars.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .timeout(Duration::from_secs(20))
        .build()
        .unwrap()
}
