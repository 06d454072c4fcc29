use crate::{
    app::{
        context::{CategoriesInfo, Health, ProductDetail},
        AppContext, AppError,
    },
    catalog::{CatalogItem, Page, PageRequest},
    cli::parse_categories,
    config::ServerConfig,
    search::{ImageSearchRequest, RecommendOutcome, RecommendRequest, SearchOutcome, SearchRequest},
};
use anyhow::Context;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const DEFAULT_FEATURED: usize = 12;

#[derive(Clone)]
struct SharedState {
    context: Arc<AppContext>,
}

pub fn router(context: Arc<AppContext>, server: &ServerConfig) -> Router {
    let shared_state = Arc::new(SharedState { context });

    Router::new()
        .route("/", get(api_info))
        .route("/health", get(health))
        .route("/api/search", post(search))
        .route("/api/upload", post(upload))
        .route("/api/upload-with-text", post(upload))
        .route("/api/recommend", post(recommend))
        .route("/api/products", get(products))
        .route("/api/product/:id", get(product))
        .route("/api/image/:id", get(image))
        .route("/api/featured", get(featured))
        .route("/api/categories", get(categories))
        .layer(DefaultBodyLimit::max(server.max_upload_bytes()))
        .layer(cors_layer(&server.cors_origins))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

async fn start_app(context: Arc<AppContext>, server: ServerConfig) -> anyhow::Result<()> {
    let app = router(context, &server);
    let addr = server.socket_addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

pub fn start_server(context: Arc<AppContext>, server: ServerConfig) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(start_app(context, server))
}

#[derive(Debug)]
struct HttpError(AppError);

impl HttpError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_error"),
            AppError::Llm(_) => (StatusCode::BAD_GATEWAY, "llm_error"),
            AppError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_error"),
            AppError::Catalog(_)
            | AppError::Config(_)
            | AppError::Storage(_)
            | AppError::IO(_)
            | AppError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            log::error!("{:?}", self.0);
        } else {
            log::debug!("{}", self.0);
        }

        (
            status,
            Json(json!({"error": {"code": code, "message": self.0.to_string()}})),
        )
            .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Extractors whose rejections render as a validation error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(HttpError))]
struct ApiJson<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(HttpError))]
struct ApiQuery<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(HttpError))]
struct ApiPath<T>(T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

async fn api_info() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "search": "POST /api/search",
            "upload": "POST /api/upload",
            "upload_with_text": "POST /api/upload-with-text",
            "recommend": "POST /api/recommend",
            "products": "GET /api/products",
            "product": "GET /api/product/:id",
            "image": "GET /api/image/:id",
            "featured": "GET /api/featured",
            "categories": "GET /api/categories",
            "health": "GET /health",
        }
    }))
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<Health> {
    Json(state.context.health())
}

async fn search(
    State(state): State<Arc<SharedState>>,
    ApiJson(payload): ApiJson<SearchRequest>,
) -> Result<Json<SearchOutcome>, HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let outcome = state.context.service().search(&payload)?;
        Ok(Json(outcome))
    })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(format!("invalid multipart body: {}", err.body_text()))
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid value for '{name}': {value}")))
}

async fn read_upload(mut multipart: Multipart) -> Result<ImageSearchRequest, AppError> {
    let mut request = ImageSearchRequest {
        ocr: true,
        ..ImageSearchRequest::default()
    };
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.image = field.bytes().await.map_err(multipart_error)?.to_vec();
                has_file = true;
            }
            "query" | "text" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.query = Some(text).filter(|t| !t.trim().is_empty());
            }
            "top_k" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.top_k = Some(parse_field("top_k", &text)?);
            }
            "semantic_top_k" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.semantic_top_k = Some(parse_field("semantic_top_k", &text)?);
            }
            "categories" => {
                let text = field.text().await.map_err(multipart_error)?;
                let categories = parse_categories(&text);
                request.categories = (!categories.is_empty()).then_some(categories);
            }
            "ocr" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.ocr = parse_field("ocr", &text.to_lowercase())?;
            }
            other => log::debug!("ignoring multipart field '{other}'"),
        }
    }

    if !has_file {
        return Err(AppError::Validation("missing 'file' field".to_string()));
    }
    Ok(request)
}

async fn upload(
    State(state): State<Arc<SharedState>>,
    multipart: Multipart,
) -> Result<Json<SearchOutcome>, HttpError> {
    let request = read_upload(multipart).await?;
    log::debug!(
        "upload: {} bytes, query={:?}, categories={:?}",
        request.image.len(),
        request.query,
        request.categories
    );

    tokio::task::block_in_place(move || {
        let outcome = state.context.service().search_by_image(&request)?;
        Ok(Json(outcome))
    })
}

async fn recommend(
    State(state): State<Arc<SharedState>>,
    ApiJson(payload): ApiJson<RecommendRequest>,
) -> Result<Json<RecommendOutcome>, HttpError> {
    tokio::task::block_in_place(move || {
        let outcome = state.context.service().recommend(&payload)?;
        Ok(Json(outcome))
    })
}

async fn products(
    State(state): State<Arc<SharedState>>,
    ApiQuery(request): ApiQuery<PageRequest>,
) -> Result<Json<Page>, HttpError> {
    Ok(Json(state.context.list_products(&request)?))
}

async fn product(
    State(state): State<Arc<SharedState>>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<ProductDetail>, HttpError> {
    tokio::task::block_in_place(move || Ok(Json(state.context.product_detail(id)?)))
}

async fn image(
    State(state): State<Arc<SharedState>>,
    ApiPath(id): ApiPath<u64>,
) -> Result<impl IntoResponse, HttpError> {
    let (bytes, mime) = tokio::task::block_in_place(|| state.context.image(id))?;
    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

#[derive(Debug, Deserialize)]
struct FeaturedParams {
    limit: Option<usize>,
}

async fn featured(
    State(state): State<Arc<SharedState>>,
    ApiQuery(params): ApiQuery<FeaturedParams>,
) -> Result<Json<Vec<CatalogItem>>, HttpError> {
    let limit = params.limit.unwrap_or(DEFAULT_FEATURED);
    Ok(Json(state.context.featured(limit)?))
}

async fn categories(State(state): State<Arc<SharedState>>) -> Json<CategoriesInfo> {
    Json(state.context.categories())
}
