//! End-to-end checks of the HTTP surface against a temporary data file and a
//! canned page renderer.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use videodex::{
    api::{AppState, router},
    catalog::CatalogSource,
    config::CorsPolicy,
    scrape::{Html5PlayerExtractor, PageRenderer, ScrapeError, ScrapeService},
};

struct CannedRenderer {
    markup: String,
    calls: AtomicUsize,
}

#[async_trait]
impl PageRenderer for CannedRenderer {
    async fn render(&self, _url: &str) -> Result<String, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.markup.clone())
    }
}

struct Harness {
    app: Router,
    renderer: Arc<CannedRenderer>,
    _data: NamedTempFile,
}

fn harness_with(data: &str, markup: &str, cors: CorsPolicy) -> Harness {
    let file = NamedTempFile::new().expect("temp file");
    std::fs::write(file.path(), data).expect("write data");
    let renderer = Arc::new(CannedRenderer {
        markup: markup.to_string(),
        calls: AtomicUsize::new(0),
    });
    let scraper = ScrapeService::new(
        renderer.clone(),
        Arc::new(Html5PlayerExtractor),
        1,
        Duration::from_secs(5),
    );
    let state = AppState::new(CatalogSource::new(file.path()), scraper);
    Harness {
        app: router(state, &cors),
        renderer,
        _data: file,
    }
}

fn harness(data: &str) -> Harness {
    harness_with(data, "", CorsPolicy::AnyOrigin)
}

const SAMPLE: &str = r#"[
    {"pageUrl": "https://x/1", "url": "https://cdn/1.mp4", "category": "a"},
    {"pageUrl": "https://x/2", "url": "https://cdn/2.mp4", "category": "b"}
]"#;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    send(app, request).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let (status, _, body) = send(app, request).await;
    (status, body)
}

#[tokio::test]
async fn listing_filters_flat_catalog_by_category() {
    let h = harness(SAMPLE);
    let (status, headers, body) = get(&h.app, "/api/videos?category=a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    assert_eq!(
        body,
        json!({
            "videos": [{"pageUrl": "https://x/1", "url": "https://cdn/1.mp4", "category": "a"}],
            "total": 1,
            "page": 1,
            "size": 20,
            "category": "a",
        })
    );
}

#[tokio::test]
async fn listing_without_category_echoes_null() {
    let h = harness(SAMPLE);
    let (status, _, body) = get(&h.app, "/api/videos?page=2&size=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["videos"][0]["url"], "https://cdn/2.mp4");
    assert_eq!(body["category"], Value::Null);
}

#[tokio::test]
async fn listing_unknown_category_and_far_page_are_empty() {
    let h = harness(r#"{"a": [{"url": "1"}], "b": [{"url": "2"}]}"#);
    let (status, _, body) = get(&h.app, "/api/videos?category=zzz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["videos"], json!([]));

    let (status, _, body) = get(&h.app, "/api/videos?page=50").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["videos"], json!([]));
}

#[tokio::test]
async fn listing_by_video_id() {
    let h = harness(r#"[{"id": 7, "url": "seven"}, {"id": "8", "url": "eight"}]"#);
    let (_, _, body) = get(&h.app, "/api/videos?videoId=7").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["videos"][0]["url"], "seven");
}

#[tokio::test]
async fn malformed_catalog_is_a_json_500() {
    let h = harness("42");
    let (status, _, body) = get(&h.app, "/api/videos").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("unsupported data format")
    );
}

#[tokio::test]
async fn non_positive_page_is_rejected() {
    let h = harness(SAMPLE);
    let (status, _, body) = get(&h.app, "/api/videos?page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn categories_list_counts() {
    let h = harness(SAMPLE);
    let (status, headers, body) = get(&h.app, "/api/categories").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(
        body,
        json!({"categories": [{"name": "a", "count": 1}, {"name": "b", "count": 1}]})
    );
}

#[tokio::test]
async fn lookup_returns_url_and_null_thumbnail() {
    let h = harness(SAMPLE);
    let (status, body) = post_json(
        &h.app,
        "/api/scrape-video-url",
        json!({"pageUrl": "https://x/2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"videoUrl": "https://cdn/2.mp4", "thumbnail": null})
    );
}

#[tokio::test]
async fn lookup_accepts_snake_case_input() {
    let h = harness(r#"[{"page_url": "p", "url": "u", "thumbnail": "t.jpg"}]"#);
    let (status, body) =
        post_json(&h.app, "/api/scrape-video-url", json!({"page_url": "p"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"videoUrl": "u", "thumbnail": "t.jpg"}));
}

#[tokio::test]
async fn lookup_without_url_is_not_found() {
    let h = harness(r#"[{"pageUrl": "p", "thumbnail": "t.jpg"}]"#);
    let (status, body) =
        post_json(&h.app, "/api/scrape-video-url", json!({"pageUrl": "p"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) =
        post_json(&h.app, "/api/scrape-video-url", json!({"pageUrl": "other"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lookup_with_numeric_url_is_not_found() {
    let h = harness(r#"[{"pageUrl": "p", "url": 42}]"#);
    let (status, body) =
        post_json(&h.app, "/api/scrape-video-url", json!({"pageUrl": "p"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn lookup_missing_input_is_bad_request() {
    let h = harness(SAMPLE);
    let (status, body) = post_json(&h.app, "/api/scrape-video-url", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing page_url");
}

#[tokio::test]
async fn scrape_missing_input_never_renders() {
    let h = harness_with(SAMPLE, "logged_user = false", CorsPolicy::AnyOrigin);
    let (status, body) = post_json(&h.app, "/api/selenium-scrape", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing page_url");
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scrape_rejects_non_web_urls() {
    let h = harness_with(SAMPLE, "logged_user = false", CorsPolicy::AnyOrigin);
    let (status, _) = post_json(
        &h.app,
        "/api/selenium-scrape",
        json!({"page_url": "file:///etc/passwd"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scrape_extracts_links() {
    let markup = r#"<script>var logged_user = false;
        html5player.setVideoUrlLow('https://cdn/low.mp4');
        html5player.setVideoUrlHigh('https://cdn/high.mp4');
        html5player.setVideoHLS('https://cdn/hls.m3u8');</script>"#;
    let h = harness_with(SAMPLE, markup, CorsPolicy::AnyOrigin);
    let (status, body) = post_json(
        &h.app,
        "/api/selenium-scrape",
        json!({"pageUrl": "https://site/video-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"video_links": [
            "https://cdn/low.mp4",
            "https://cdn/high.mp4",
            "https://cdn/hls.m3u8",
        ]})
    );
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scrape_without_marker_is_not_found() {
    let h = harness_with(SAMPLE, "<html>captcha</html>", CorsPolicy::AnyOrigin);
    let (status, body) = post_json(
        &h.app,
        "/api/selenium-scrape",
        json!({"page_url": "https://site/video-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "'logged_user = false' not found in HTML");
}

#[tokio::test]
async fn health_endpoints_respond() {
    let h = harness(SAMPLE);
    let (status, _, body) = get(&h.app, "/api").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (_, _, body) = get(&h.app, "/health").await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_f64());

    let (_, _, body) = get(&h.app, "/api/health").await;
    assert_eq!(body["service"], "backend-api");
}

#[tokio::test]
async fn cors_mirrors_any_origin_with_credentials() {
    let h = harness(SAMPLE);
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/health")
        .header(header::ORIGIN, "https://anywhere.example")
        .body(Body::empty())
        .expect("request");
    let (_, headers, _) = send(&h.app, request).await;
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://anywhere.example"
    );
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .unwrap(),
        "true"
    );
}

#[tokio::test]
async fn cors_allow_list_rejects_other_origins() {
    let h = harness_with(
        SAMPLE,
        "",
        CorsPolicy::AllowList(vec!["https://good.example".into()]),
    );
    let request = |origin: &str| {
        Request::builder()
            .method(Method::GET)
            .uri("/api")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .expect("request")
    };

    let (_, headers, _) = send(&h.app, request("https://good.example")).await;
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://good.example"
    );

    let (_, headers, _) = send(&h.app, request("https://evil.example")).await;
    assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
