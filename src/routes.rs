use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    handler::HandlerWithoutStateExt,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir,
    set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::error;

use crate::aggregator::Aggregator;
use crate::catalog::SourceCatalog;
use crate::config::Config;
use crate::filter::{ArticleFilter, ALL_CATEGORIES};
use crate::model::{Article, FeedDescriptor, FeedStatusMap, StatusSummary};
use crate::scheduler::RefreshScheduler;

pub struct ServerState {
    pub aggregator: Arc<Aggregator>,
    pub scheduler: Arc<RefreshScheduler>,
}

/// Build the application router: JSON API under `/api`, static files for
/// everything else.
pub fn router(state: Arc<ServerState>, config: &Config) -> Router {
    let static_files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            cache_control(config.cache_expiry),
        ))
        .service(ServeDir::new(&config.static_dir).not_found_service(not_found.into_service()));

    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/articles", get(articles))
        .route("/api/filter", post(set_filter))
        .route("/api/status", get(status))
        .route("/api/sources", get(sources))
        .route("/api/refresh", post(refresh))
        .route("/api/refresh/status", get(refresh_status))
        .route("/api/auto-refresh", post(auto_refresh))
        .fallback_service(static_files);

    with_middleware(api).with_state(state)
}

/// Request tracing, permissive CORS, and a JSON 500 for panicking handlers.
fn with_middleware<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::custom(handle_panic)),
    )
}

fn cache_control(max_age: u64) -> HeaderValue {
    HeaderValue::from_str(&format!("public, max-age={}", max_age))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal Server Error" })),
    )
        .into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Request handler panicked: {}", detail);
    internal_error()
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ArticlesQuery {
    pub category: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ArticlesResponse {
    pub category: String,
    pub search: String,
    pub count: usize,
    pub articles: Vec<Article>,
}

impl ArticlesResponse {
    fn new(filter: &ArticleFilter, articles: Vec<Article>) -> Self {
        Self {
            category: filter.category().to_string(),
            search: filter.search().to_string(),
            count: articles.len(),
            articles,
        }
    }
}

/// Without parameters: the displayed subset. With `category` and/or `q`: an
/// ad-hoc view that leaves the active filter alone.
pub async fn articles(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ArticlesQuery>,
) -> Json<ArticlesResponse> {
    if query.category.is_none() && query.q.is_none() {
        let app = state.aggregator.state().await;
        return Json(ArticlesResponse::new(&app.filter, app.filtered.clone()));
    }

    let filter = ArticleFilter::new(
        query.category.as_deref().unwrap_or(ALL_CATEGORIES),
        query.q.as_deref().unwrap_or(""),
    );
    let articles = state.aggregator.filtered_view(&filter).await;
    Json(ArticlesResponse::new(&filter, articles))
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterRequest {
    pub category: Option<String>,
    pub search: Option<String>,
}

pub async fn set_filter(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<FilterRequest>,
) -> Json<ArticlesResponse> {
    let articles = state
        .aggregator
        .set_filter(request.category.as_deref(), request.search.as_deref())
        .await;
    let filter = state.aggregator.state().await.filter.clone();
    Json(ArticlesResponse::new(&filter, articles))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub summary: StatusSummary,
    pub refreshing: bool,
    pub auto_refresh: bool,
    pub feeds: FeedStatusMap,
}

pub async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    let refreshing = state.aggregator.is_refreshing();
    let app = state.aggregator.state().await;
    Json(StatusResponse {
        summary: app.summary(),
        refreshing,
        auto_refresh: state.scheduler.is_enabled(),
        feeds: app.feed_status.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct CategoryView {
    pub key: String,
    pub label: String,
    pub feeds: Vec<FeedDescriptor>,
}

pub async fn sources(State(state): State<Arc<ServerState>>) -> Json<Vec<CategoryView>> {
    let app = state.aggregator.state().await;
    let categories = app
        .sources
        .categories()
        .iter()
        .map(|c| CategoryView {
            key: c.key.clone(),
            label: SourceCatalog::label(&c.key).to_string(),
            feeds: c.feeds.clone(),
        })
        .collect();
    Json(categories)
}

pub async fn refresh(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let aggregator = state.aggregator.clone();
    tokio::spawn(async move {
        aggregator.refresh_news().await;
    });

    (StatusCode::ACCEPTED, Json(json!({ "refreshing": true })))
}

pub async fn refresh_status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let refreshing = state.aggregator.is_refreshing();
    Json(json!({ "refreshing": refreshing }))
}

#[derive(Debug, Deserialize)]
pub struct AutoRefreshRequest {
    pub enabled: bool,
}

pub async fn auto_refresh(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AutoRefreshRequest>,
) -> impl IntoResponse {
    if request.enabled {
        state.scheduler.enable_for(state.aggregator.clone());
    } else {
        state.scheduler.disable();
    }

    Json(json!({
        "enabled": state.scheduler.is_enabled(),
        "intervalSeconds": state.scheduler.period().as_secs(),
    }))
}
