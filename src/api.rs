//! HTTP surface: routes, CORS, and the JSON error envelope.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    catalog::{CatalogError, CatalogSource, CategorySummary, PageRequest, VideoRecord},
    config::{CorsPolicy, ServerConfig},
    scrape::{ScrapeError, ScrapeService},
};

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<CatalogSource>,
    scraper: Arc<ScrapeService>,
}

impl AppState {
    pub fn new(catalog: CatalogSource, scraper: ScrapeService) -> Self {
        Self {
            catalog: Arc::new(catalog),
            scraper: Arc::new(scraper),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            CatalogSource::new(config.data_file.clone()),
            ScrapeService::from_settings(&config.scrape),
        )
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        match err {
            ScrapeError::MarkerMissing => Self::not_found(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Registers every route on top of `state` and applies the CORS policy.
pub fn router(state: AppState, cors: &CorsPolicy) -> Router {
    Router::new()
        .route("/api", get(api_root))
        .route("/health", get(health))
        .route("/api/health", get(api_health))
        .route("/api/videos", get(list_videos))
        .route("/api/categories", get(list_categories))
        .route("/api/scrape-video-url", post(lookup_video_url))
        .route("/api/selenium-scrape", post(scrape_page))
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    let allow_origin = match policy {
        CorsPolicy::AnyOrigin => AllowOrigin::mirror_request(),
        CorsPolicy::AllowList(origins) => AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| warn!(origin = %origin, "ignoring invalid CORS origin"))
                .ok()
        })),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
}

fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

async fn api_root() -> Json<Value> {
    Json(json!({ "ok": true, "message": "API is up" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "timestamp": unix_timestamp() }))
}

async fn api_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "backend-api",
        "timestamp": unix_timestamp(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    page: Option<String>,
    size: Option<String>,
    category: Option<String>,
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct VideoListResponse {
    videos: Vec<VideoRecord>,
    total: usize,
    page: usize,
    size: usize,
    category: Option<String>,
}

#[derive(Debug, Serialize)]
struct CategoryListResponse {
    categories: Vec<CategorySummary>,
}

fn positive_param(name: &str, raw: Option<&str>, default: usize) -> ApiResult<usize> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ApiError::bad_request(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}

fn no_store(body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}

async fn list_videos(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) = params.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let page = positive_param("page", params.page.as_deref(), DEFAULT_PAGE)?;
    let size = positive_param("size", params.size.as_deref(), DEFAULT_PAGE_SIZE)?;

    let catalog = state.catalog.load().await?;
    let result = catalog.page(&PageRequest {
        page,
        size,
        category: params.category.as_deref(),
        video_id: params.video_id.as_deref(),
    });
    debug!(
        page,
        size,
        total = result.total,
        returned = result.videos.len(),
        "listing videos"
    );

    Ok(no_store(Json(VideoListResponse {
        videos: result.videos,
        total: result.total,
        page,
        size,
        category: params.category,
    })))
}

async fn list_categories(State(state): State<AppState>) -> ApiResult<Response> {
    let catalog = state.catalog.load().await?;
    Ok(no_store(Json(CategoryListResponse {
        categories: catalog.categories(),
    })))
}

/// Both spellings of the page URL field are accepted on input.
#[derive(Debug, Default, Deserialize)]
struct PageUrlBody {
    #[serde(rename = "pageUrl")]
    camel: Option<String>,
    #[serde(rename = "page_url")]
    snake: Option<String>,
}

impl PageUrlBody {
    fn pick(first: Option<String>, second: Option<String>) -> ApiResult<String> {
        first
            .filter(|value| !value.is_empty())
            .or(second.filter(|value| !value.is_empty()))
            .ok_or_else(|| ApiError::bad_request("Missing page_url"))
    }

    fn camel_first(self) -> ApiResult<String> {
        Self::pick(self.camel, self.snake)
    }

    fn snake_first(self) -> ApiResult<String> {
        Self::pick(self.snake, self.camel)
    }
}

fn page_url_body(payload: Result<Json<PageUrlBody>, JsonRejection>) -> ApiResult<PageUrlBody> {
    payload
        .map(|Json(body)| body)
        .map_err(|_| ApiError::bad_request("Missing page_url"))
}

#[derive(Debug, Serialize)]
struct VideoUrlResponse {
    #[serde(rename = "videoUrl")]
    video_url: String,
    thumbnail: Value,
}

async fn lookup_video_url(
    State(state): State<AppState>,
    payload: Result<Json<PageUrlBody>, JsonRejection>,
) -> ApiResult<Json<VideoUrlResponse>> {
    let page_url = page_url_body(payload)?.camel_first()?;
    let catalog = state.catalog.load().await?;

    let record = catalog
        .find_by_page_url(&page_url)
        .ok_or_else(|| ApiError::not_found("No video found for that page"))?;
    let video_url = record
        .url()
        .ok_or_else(|| ApiError::not_found("No video found for that page"))?;

    Ok(Json(VideoUrlResponse {
        video_url: video_url.to_owned(),
        thumbnail: record.thumbnail().cloned().unwrap_or(Value::Null),
    }))
}

#[derive(Debug, Serialize)]
struct ScrapeResponse {
    video_links: Vec<String>,
}

async fn scrape_page(
    State(state): State<AppState>,
    payload: Result<Json<PageUrlBody>, JsonRejection>,
) -> ApiResult<Json<ScrapeResponse>> {
    let page_url = page_url_body(payload)?.snake_first()?;
    // Only web URLs reach the browser command line.
    let parsed = Url::parse(&page_url)
        .map_err(|err| ApiError::bad_request(format!("Invalid page_url: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::bad_request(format!(
            "Invalid page_url: unsupported scheme {}",
            parsed.scheme()
        )));
    }

    let video_links = state.scraper.scrape(parsed.as_str()).await?;
    Ok(Json(ScrapeResponse { video_links }))
}
