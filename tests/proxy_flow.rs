//! End-to-end request flows through a live proxy and a mock origin.

use std::net::SocketAddr;

use axum::http::{header, Request, StatusCode};
use bandwidth_hero_proxy::config::ResponseMode;
use bandwidth_hero_proxy::http::{HttpServer, X_BYTES_SAVED, X_ORIGINAL_SIZE, X_PROXY_BYPASS};
use image::ColorType;
use tower::ServiceExt;

mod common;

fn header_u64(res: &reqwest::Response, name: &str) -> u64 {
    res.headers()[name].to_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn missing_url_returns_placeholder() {
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client().get(proxy.url("")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "bandwidth-hero-proxy");

    let res = common::client().get(proxy.url("?jpeg=1&l=20")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "bandwidth-hero-proxy");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn malformed_url_is_bad_request() {
    let proxy = common::start_proxy(common::test_config()).await;

    for query in ["?url=not-a-url", "?url=ftp://example.com/a.png"] {
        let res = common::client().get(proxy.url(query)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", query);
        assert!(res.headers().get(header::LOCATION).is_none());
    }

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn png_is_transcoded_to_grayscale_webp() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/photo.png"))))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(res.headers()[header::CONTENT_ENCODING], "identity");
    assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(res.headers()["cross-origin-resource-policy"], "cross-origin");
    assert_eq!(res.headers()["cross-origin-embedder-policy"], "unsafe-none");
    assert!(res.headers().get(X_PROXY_BYPASS).is_none());

    let original = header_u64(&res, X_ORIGINAL_SIZE.as_str());
    let length = header_u64(&res, header::CONTENT_LENGTH.as_str());
    let saved: i64 = res.headers()[X_BYTES_SAVED].to_str().unwrap().parse().unwrap();
    assert_eq!(original, origin.png.len() as u64);
    assert_eq!(saved, original as i64 - length as i64);

    let body = res.bytes().await.unwrap();
    assert_eq!(body.len() as u64, length);
    assert_eq!(image::guess_format(&body).unwrap(), image::ImageFormat::WebP);
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (256, 256));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn jpeg_request_honours_color_and_quality() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();

    let color = client
        .get(proxy.url(&format!("?url={}&jpeg=1&bw=0&l=30", origin.url("/photo.jpg"))))
        .send()
        .await
        .unwrap();
    assert_eq!(color.status(), StatusCode::OK);
    assert_eq!(color.headers()[header::CONTENT_TYPE], "image/jpeg");
    let color = image::load_from_memory(&color.bytes().await.unwrap()).unwrap();
    assert_eq!(color.color(), ColorType::Rgb8);

    let gray = client
        .get(proxy.url(&format!("?url={}&jpeg=1&l=30", origin.url("/photo.jpg"))))
        .send()
        .await
        .unwrap();
    let gray = image::load_from_memory(&gray.bytes().await.unwrap()).unwrap();
    assert_eq!(gray.color(), ColorType::L8);
    assert_eq!((gray.width(), gray.height()), (256, 256));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn small_and_non_image_responses_pass_through() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();

    let res = client
        .get(proxy.url(&format!("?url={}", origin.url("/tiny.png"))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[X_PROXY_BYPASS], "1");
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(res.headers().get(header::ETAG).is_none());
    assert_eq!(res.bytes().await.unwrap(), origin.tiny);

    let res = client
        .get(proxy.url(&format!("?url={}", origin.url("/page.html"))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()[X_PROXY_BYPASS], "1");
    assert!(res.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn png_below_transparency_threshold_is_kept_for_jpeg_clients() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;

    assert!((1024..102_400).contains(&origin.small.len()), "fixture is {} bytes", origin.small.len());

    let res = common::client()
        .get(proxy.url(&format!("?url={}&jpeg=1", origin.url("/small.png"))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[X_PROXY_BYPASS], "1");
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(res.bytes().await.unwrap(), origin.small);

    // The same fixture is compressed for WebP clients.
    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/small.png"))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/webp");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn range_requests_are_relayed_untouched() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/photo.png"))))
        .header(header::RANGE, "bytes=0-99")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()[X_PROXY_BYPASS], "1");
    assert_eq!(
        res.headers()[header::CONTENT_RANGE],
        format!("bytes 0-99/{}", origin.png.len()).as_str()
    );
    assert_eq!(res.bytes().await.unwrap(), origin.png.slice(..100));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn origin_error_redirects_to_origin() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let target = origin.url("/missing");

    let res = common::client()
        .get(proxy.url(&format!("?url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], target.as_str());
    assert_eq!(res.headers()[header::CONTENT_LENGTH], "0");
    assert!(res.headers().get(header::CACHE_CONTROL).is_none());
    assert!(res.headers().get(header::ETAG).is_none());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn origin_redirect_is_surfaced() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/moved"))))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], origin.url("/photo.png").as_str());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn origin_redirect_is_followed_when_enabled() {
    let origin = common::start_origin().await;
    let mut config = common::test_config();
    config.upstream.max_redirects = 2;
    let proxy = common::start_proxy(config).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/moved"))))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(origin.hits(), 2);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn unreachable_origin_redirects() {
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = format!("http://{}/photo.png", closed.local_addr().unwrap());
    drop(closed);

    let proxy = common::start_proxy(common::test_config()).await;
    let res = common::client()
        .get(proxy.url(&format!("?url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], target.as_str());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn stalled_origin_body_redirects() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let target = origin.url("/stall");

    let res = common::client()
        .get(proxy.url(&format!("?url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], target.as_str());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn request_deadline_redirects_before_idle_timeout() {
    let origin = common::start_origin().await;
    let mut config = common::test_config();
    config.timeouts.request_secs = 1;
    config.upstream.body_idle_timeout_secs = 5;
    let proxy = common::start_proxy(config).await;
    let target = origin.url("/stall");

    let started = std::time::Instant::now();
    let res = common::client()
        .get(proxy.url(&format!("?url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], target.as_str());
    assert!(started.elapsed() < std::time::Duration::from_secs(4));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn cookie_follows_same_origin_redirects_only() {
    let origin = common::start_origin().await;
    let other = common::start_origin().await;
    let mut config = common::test_config();
    config.upstream.max_redirects = 2;
    let proxy = common::start_proxy(config).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/moved"))))
        .header(header::COOKIE, "session=abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(origin.last_headers().unwrap()[header::COOKIE], "session=abc");

    let bounce = format!("/bounce?to={}", other.url("/photo.png"));
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("url", &origin.url(&bounce))
        .finish();
    let res = common::client()
        .get(proxy.url(&format!("?{}", query)))
        .header(header::COOKIE, "session=abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(other.hits(), 1);
    let seen = other.last_headers().unwrap();
    assert!(seen.get(header::COOKIE).is_none());
    assert_eq!(seen[header::VIA], "1.1 bandwidth-hero");

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn oversized_input_redirects() {
    let origin = common::start_origin().await;
    let mut config = common::test_config();
    config.transcode.max_input_bytes = 10 * 1024;
    let proxy = common::start_proxy(config).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/photo.png"))))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], origin.url("/photo.png").as_str());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn repeated_requests_are_byte_identical() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();
    let url = proxy.url(&format!("?url={}&l=55", origin.url("/photo.jpg")));

    let first = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    let second = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(origin.hits(), 2);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn cache_serves_repeat_requests_without_refetching() {
    let origin = common::start_origin().await;
    let mut config = common::test_config();
    config.cache.enabled = true;
    let proxy = common::start_proxy(config).await;
    let client = common::client();
    let url = proxy.url(&format!("?url={}", origin.url("/photo.jpg")));

    let first = client.get(&url).send().await.unwrap();
    let first_headers = first.headers().clone();
    let first = first.bytes().await.unwrap();

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.headers()[X_ORIGINAL_SIZE], first_headers[X_ORIGINAL_SIZE]);
    assert_eq!(second.headers()[X_BYTES_SAVED], first_headers[X_BYTES_SAVED]);
    assert_eq!(second.bytes().await.unwrap(), first);
    assert_eq!(origin.hits(), 1);

    // A different quality is a different entry.
    client
        .get(proxy.url(&format!("?url={}&l=80", origin.url("/photo.jpg"))))
        .send()
        .await
        .unwrap();
    assert_eq!(origin.hits(), 2);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn chunked_mode_omits_length_headers() {
    let origin = common::start_origin().await;
    let mut config = common::test_config();
    config.transcode.response_mode = ResponseMode::Chunked;
    config.transcode.chunk_size = 1024;
    let proxy = common::start_proxy(config).await;

    let res = common::client()
        .get(proxy.url(&format!("?url={}&jpeg=1", origin.url("/photo.jpg"))))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(header_u64(&res, X_ORIGINAL_SIZE.as_str()), origin.jpeg.len() as u64);
    assert!(res.headers().get(header::CONTENT_LENGTH).is_none());
    assert!(res.headers().get(X_BYTES_SAVED).is_none());

    let body = res.bytes().await.unwrap();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (256, 256));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn outbound_request_carries_proxy_headers() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;

    common::client()
        .get(proxy.url(&format!("?url={}", origin.url("/tiny.png"))))
        .header(header::COOKIE, "session=abc")
        .header(header::REFERER, "https://news.test/")
        .header(header::ACCEPT_LANGUAGE, "en")
        .send()
        .await
        .unwrap();

    let seen = origin.last_headers().unwrap();
    assert_eq!(seen[header::VIA], "1.1 bandwidth-hero");
    assert_eq!(seen[header::USER_AGENT], "Bandwidth-Hero Compressor");
    assert_eq!(seen["x-forwarded-for"], "127.0.0.1");
    assert_eq!(seen[header::COOKIE], "session=abc");
    assert_eq!(seen[header::REFERER], "https://news.test/");
    assert!(seen.get(header::ACCEPT_LANGUAGE).is_none());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn looped_request_is_sent_back_to_origin() {
    let origin = common::start_origin().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let target = origin.url("/photo.png");

    let res = common::client()
        .get(proxy.url(&format!("?url={}", target)))
        .header(header::VIA, "1.1 bandwidth-hero")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], target.as_str());
    assert_eq!(origin.hits(), 0);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn concurrent_transcodes_share_a_single_slot() {
    let origin = common::start_origin().await;
    let mut config = common::test_config();
    config.transcode.concurrency = 1;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let requests = (0..6).map(|i| {
        let client = client.clone();
        let url = proxy.url(&format!("?url={}&l={}", origin.url("/photo.jpg"), 20 + i));
        tokio::spawn(async move { client.get(url).send().await.unwrap().status() })
    });
    for request in requests.collect::<Vec<_>>() {
        assert_eq!(request.await.unwrap(), StatusCode::OK);
    }

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn redirect_strips_caching_headers_before_transport() {
    let origin = common::start_origin().await;
    let server = HttpServer::new(common::test_config()).unwrap();
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let app = server
        .router()
        .layer(axum::extract::connect_info::MockConnectInfo(peer));

    let request = Request::builder()
        .uri(format!("/?url={}", origin.url("/missing")))
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(request).await.unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    for name in [header::CACHE_CONTROL, header::EXPIRES, header::DATE, header::ETAG] {
        assert!(res.headers().get(&name).is_none(), "{} leaked", name);
    }
    assert!(res.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn graceful_shutdown_stops_accepting() {
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();
    assert_eq!(client.get(proxy.url("")).send().await.unwrap().status(), StatusCode::OK);

    proxy.shutdown.trigger();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let fresh = common::client();
    assert!(fresh.get(proxy.url("")).send().await.is_err());
}
