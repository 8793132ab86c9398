use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::MultipartError,
        rejection::JsonRejection,
    },
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use docqa_rag::{IndexStatus, RagError, RagPipeline};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::ServerConfig,
    extract::extract_document,
    storage::{sanitize_filename, store_upload},
};

/// Multipart field carrying uploaded files.
const FILES_FIELD: &str = "files";

#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub docs_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>, docs_dir: impl Into<PathBuf>) -> Self {
        Self { pipeline, docs_dir: Arc::new(docs_dir.into()) }
    }
}

/// Transport-level settings for [`app_router`].
#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub cors_origin: String,
    pub max_upload_bytes: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self { cors_origin: "http://localhost:5173".to_string(), max_upload_bytes: 64 * 1024 * 1024 }
    }
}

impl From<&ServerConfig> for HttpOptions {
    fn from(config: &ServerConfig) -> Self {
        Self { cors_origin: config.cors_origin.clone(), max_upload_bytes: config.max_upload_bytes }
    }
}

pub fn app_router(state: AppState, options: &HttpOptions) -> anyhow::Result<Router> {
    let origin = HeaderValue::from_str(&options.cors_origin)
        .with_context(|| format!("invalid CORS origin {:?}", options.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/upload/", post(upload))
        .route("/ask", post(ask))
        .route("/ask/", post(ask))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(options.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

pub async fn run_server(config: &ServerConfig, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let state = AppState::new(pipeline, config.docs_dir.clone());
    let app = app_router(state, &HttpOptions::from(config))?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for docqa server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("docqa listening on http://{}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    indexed: bool,
    chunks: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let chunks = state.pipeline.slot().get().map_or(0, |index| index.len());
    Json(HealthResponse { status: "ok", indexed: state.pipeline.is_indexed(), chunks })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum UploadOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: &'static str,
    status: UploadOutcome,
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<usize>,
}

impl UploadResponse {
    fn already_exists(files: Vec<String>) -> Self {
        Self {
            message: "Vector index already exists.",
            status: UploadOutcome::AlreadyExists,
            files,
            chunks: None,
        }
    }
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut stored = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let raw_name = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| RagError::InvalidInput("file part is missing a filename".to_string()))?;
        let name = sanitize_filename(&raw_name)?;
        let bytes = field.bytes().await?;
        let path = store_upload(&state.docs_dir, &name, &bytes).await?;
        info!(document.id = %name, bytes = bytes.len(), "stored upload");
        stored.push((name, path));
    }
    if stored.is_empty() {
        return Err(RagError::InvalidInput(format!("no `{FILES_FIELD}` parts in upload")).into());
    }
    let files: Vec<String> = stored.iter().map(|(name, _)| name.clone()).collect();

    if state.pipeline.is_indexed() {
        info!(files = files.len(), "index already exists, upload stored only");
        return Ok(Json(UploadResponse::already_exists(files)));
    }

    let documents =
        try_join_all(stored.into_iter().map(|(name, path)| extract_document(path, name))).await?;
    let response = match state.pipeline.index_documents(documents).await? {
        IndexStatus::Created { chunks, .. } => UploadResponse {
            message: "Vector index created successfully.",
            status: UploadOutcome::Created,
            files,
            chunks: Some(chunks),
        },
        IndexStatus::AlreadyExists => UploadResponse::already_exists(files),
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    user_input: String,
}

#[derive(Debug, Serialize)]
struct Source {
    document: String,
    chunk_index: usize,
    score: f32,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
    sources: Vec<Source>,
}

async fn ask(
    State(state): State<AppState>,
    request: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let Json(request) = request?;
    let answer = state.pipeline.ask(&request.user_input).await?;
    let sources = answer
        .context
        .passages
        .into_iter()
        .map(|passage| Source {
            document: passage.chunk.document_id,
            chunk_index: passage.chunk.index,
            score: passage.relevance,
        })
        .collect();
    Ok(Json(AskResponse { response: answer.text, sources }))
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Rag(#[from] RagError),
    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("invalid request body: {0}")]
    Json(#[from] JsonRejection),
    #[error("failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Rag(err) => match err {
                RagError::NotIndexed => StatusCode::NOT_FOUND,
                RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                RagError::DataError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                RagError::EmbeddingError { .. }
                | RagError::RerankerError { .. }
                | RagError::GenerationError { .. } => StatusCode::BAD_GATEWAY,
                RagError::ConfigError(_) | RagError::SnapshotError { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Multipart(err) => err.status(),
            Self::Json(rejection) => rejection.status(),
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
