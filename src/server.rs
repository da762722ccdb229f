//! JSON HTTP API over a [`ChatbotLifecycle`].

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    chatbot::{DEFAULT_DESCRIPTION, DEFAULT_NAME},
    dataset_db::DatasetDb,
    error::Error,
    lifecycle::ChatbotLifecycle,
};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ChatbotLifecycle>,
    pub datasets: Arc<DatasetDb>,
    /// Deployment URL prefix; falls back to the request's `Host` header.
    pub base_url: Option<String>,
    /// Neighbors retrieved when a chat request does not specify `k`.
    pub top_k: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let ApiError::Core(err) = self else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match err {
            Error::NotFound { .. } | Error::EmptyDataset(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidTransition { .. }
            | Error::DimensionMismatch { .. }
            | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotTrained(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Core(err) => err.kind(),
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        } else {
            tracing::debug!(%status, error = %message, "request rejected");
        }

        let body = Json(json!({ "error": message, "kind": self.kind() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateRequest {
    /// Accepted for compatibility; the dataset is chosen at train time.
    pub meta_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub meta_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub k: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chatbots", get(list_chatbots))
        .route("/api/chatbots/create", post(create_chatbot))
        .route("/api/chatbots/{id}", get(get_chatbot))
        .route("/api/chatbots/{id}/train", post(train_chatbot))
        .route("/api/chatbots/{id}/deploy", post(deploy_chatbot))
        .route("/api/chatbots/{id}/chat", post(chat))
        .route("/api/testsets", get(list_testsets))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start a tokio runtime and serve on `addr` until Ctrl-C.
pub fn run_server(state: AppState, addr: &str) -> crate::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(serve(state, addr))
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local: SocketAddr = listener.local_addr()?;
    tracing::info!(addr = %local, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_chatbots(
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.lifecycle.list()?))
}

async fn create_chatbot(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    if let Some(meta_id) = &request.meta_id {
        tracing::debug!(meta_id, "create request carried a dataset id");
    }

    let name = request.name.as_deref().unwrap_or(DEFAULT_NAME);
    let description =
        request.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION);
    let chatbot = state.lifecycle.create(name, description)?;
    Ok(Json(json!({ "chatbot_id": chatbot.id })))
}

async fn get_chatbot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_chatbot_id(&id)?;
    let chatbot = state
        .lifecycle
        .get(&id)?
        .ok_or_else(|| Error::chatbot_not_found(id))?;
    Ok(Json(chatbot))
}

async fn train_chatbot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_chatbot_id(&id)?;
    let meta_id = payload
        .ok()
        .and_then(|Json(r)| r.meta_id)
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or_else(|| {
            Error::InvalidInput("invalid or missing meta_id".to_string())
        })?;

    let lifecycle = Arc::clone(&state.lifecycle);
    let outcome = tokio::task::spawn_blocking(move || {
        lifecycle.train(&id, &meta_id.to_string())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("training task failed: {e}")))??;

    Ok(Json(json!({
        "message": "Trained Successfully",
        "examples": outcome.examples,
    })))
}

async fn deploy_chatbot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let id = parse_chatbot_id(&id)?;
    let base_url = match &state.base_url {
        Some(url) => url.clone(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{host}")
        }
    };

    let chatbot = state.lifecycle.deploy(&id, &base_url)?;
    Ok(Json(json!({
        "message": "Deployment Successful",
        "deployment_url": chatbot.deployment_url,
    })))
}

async fn chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_chatbot_id(&id)?;
    let Json(request) = payload
        .map_err(|e| Error::InvalidInput(format!("invalid chat request: {e}")))?;

    let k = request.k.unwrap_or(state.top_k);
    let answer = state.lifecycle.respond(&id, &request.message, k)?;
    Ok(Json(json!({ "answer": answer })))
}

async fn list_testsets(
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.datasets.list_datasets()?))
}

/// Chatbot ids that are not UUIDs cannot exist, so they are reported as
/// missing rather than malformed.
fn parse_chatbot_id(raw: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|_| Error::chatbot_not_found(raw))
}
