//! HTTP API for conversation lifecycle and content.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::storage::{Conversation, DocumentId, DocumentStore, SledMetadataStore, StorageError};
use crate::sync::{CoordinatorStats, WriteCoordinator};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    pub metadata: Arc<SledMetadataStore>,
    /// Same store (and cache) the write coordinator uses
    pub documents: Arc<dyn DocumentStore>,
    pub coordinator: Arc<WriteCoordinator>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        metadata: Arc<SledMetadataStore>,
        documents: Arc<dyn DocumentStore>,
        coordinator: Arc<WriteCoordinator>,
    ) -> Self {
        Self {
            metadata,
            documents,
            coordinator,
            started_at: Instant::now(),
        }
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    writer: CoordinatorStats,
}

#[derive(Debug, Deserialize)]
struct CreateConversationRequest {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateConversationRequest {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConversationListResponse {
    conversations: Vec<Conversation>,
    total: usize,
}

/// Request failure rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    NotFound(DocumentId),
    BadRequest(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Storage(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Conversation {} not found", id),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Storage(e) => {
                error!("Storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal storage error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Writers stop before the listener during shutdown
    let status = if state.coordinator.is_closed() {
        "draining"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        writer: state.coordinator.stats(),
    })
}

/// Create a conversation and its empty content blob
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateConversationRequest>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Conversation name is required".to_string()));
    }

    let conversation = state
        .metadata
        .create_conversation(name, payload.description.as_deref())?;

    if let Err(e) = state.documents.create(conversation.id).await {
        error!(
            "Failed to create content for conversation {}: {}",
            conversation.id, e
        );
        if let Err(rollback) = state.metadata.delete_conversation(conversation.id) {
            error!(
                "Failed to roll back conversation {}: {}",
                conversation.id, rollback
            );
        }
        return Err(ApiError::Storage(e));
    }

    info!("Created conversation {} ({})", conversation.id, conversation.name);
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// List all conversations, most recently modified first
async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ConversationListResponse>> {
    let conversations = state.metadata.list_conversations()?;
    let total = conversations.len();
    Ok(Json(ConversationListResponse {
        conversations,
        total,
    }))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DocumentId>,
) -> ApiResult<Json<Conversation>> {
    state
        .metadata
        .get_conversation(id)?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DocumentId>,
    Json(payload): Json<UpdateConversationRequest>,
) -> ApiResult<Json<Conversation>> {
    let name = payload.name.as_deref().map(str::trim);
    if name == Some("") {
        return Err(ApiError::BadRequest("Conversation name is required".to_string()));
    }

    let conversation = state
        .metadata
        .update_conversation(id, name, payload.description.as_deref())?;
    Ok(Json(conversation))
}

/// Delete the content blob, then the conversation row
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DocumentId>,
) -> ApiResult<StatusCode> {
    match state.documents.delete(id).await {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    state.metadata.delete_conversation(id)?;

    info!("Deleted conversation {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Current conversation content
async fn get_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DocumentId>,
) -> ApiResult<([(header::HeaderName, &'static str); 1], Bytes)> {
    let content = state.documents.read(id).await.map_err(|e| {
        if !matches!(e, StorageError::NotFound(_)) {
            warn!("Failed to read content of conversation {}: {}", id, e);
        }
        ApiError::from(e)
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        content,
    ))
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/ether/v1/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/ether/v1/conversations/:id",
            get(get_conversation)
                .patch(update_conversation)
                .delete(delete_conversation),
        )
        .route("/ether/v1/conversations/:id/content", get(get_content))
        .with_state(state)
}
