use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ValidatorConfig;
use crate::error::{ModelInvocationError, PersistenceError};
use crate::fetcher::{FetchResult, ReadmeFetcher};
use crate::llm::{build_provider, ChatMessage, ModelInvoker};
use crate::relay::relay;
use crate::rubric::ConversationMode;
use crate::store::{build_store, DynMessageStore, StoredMessage};
use crate::workflow::{FetchOrchestrator, WorkflowState, WorkflowStatus};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: FetchOrchestrator,
    pub invoker: ModelInvoker,
    pub store: DynMessageStore,
    pub default_model: String,
}

impl AppState {
    pub fn from_config(cfg: &ValidatorConfig) -> anyhow::Result<Self> {
        let fetcher = ReadmeFetcher::new(cfg.fetcher.clone())?;
        let orchestrator = FetchOrchestrator::new(
            Arc::new(fetcher),
            Duration::from_secs(cfg.workflow.retention_secs),
        );
        let provider = build_provider(&cfg.model)?;
        let invoker = ModelInvoker::new(provider, cfg.model.max_attempts);
        let store = build_store(cfg.storage.path.as_deref());
        info!(
            provider = invoker.provider_name(),
            model = %cfg.model.default_model,
            persistent = cfg.storage.path.is_some(),
            "app state ready"
        );
        Ok(Self {
            orchestrator,
            invoker,
            store,
            default_model: cfg.model.default_model.clone(),
        })
    }
}

/// Routes are served at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/fetch-readme", post(start_fetch))
        .route("/fetch-readme/status/{workflow_id}", get(fetch_status))
        .route("/chat", post(chat))
        .route("/messages", post(save_messages))
        .route(
            "/messages/{conversation_id}",
            get(list_messages).delete(clear_messages),
        )
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Model(ModelInvocationError),
    Persistence(PersistenceError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Model(e) => {
                error!(error = %e, "chat request failed");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            ApiError::Persistence(e) => {
                error!(error = %e, "storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        ApiError::Persistence(e)
    }
}

// ------------------------------------------------------------
// README fetch workflow
// ------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchReq {
    #[serde(default, alias = "githubUrl")]
    repository_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchStarted {
    workflow_id: Uuid,
    status: &'static str,
    message: &'static str,
}

async fn start_fetch(
    State(state): State<AppState>,
    Json(body): Json<FetchReq>,
) -> Result<Json<FetchStarted>, ApiError> {
    let url = body
        .repository_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("GitHub URL is required".to_string()))?;

    let handle = state.orchestrator.start(&url);
    Ok(Json(FetchStarted {
        workflow_id: handle.id,
        status: "started",
        message: "README fetch workflow started",
    }))
}

#[derive(Serialize)]
struct StatusResp {
    status: WorkflowState,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<FetchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn fetch_status(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<StatusResp>, ApiError> {
    let id = Uuid::parse_str(&workflow_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid workflow id '{workflow_id}'")))?;
    let status = state
        .orchestrator
        .poll(id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown workflow '{id}'")))?;

    let state_tag = status.state();
    let (result, error) = match status {
        WorkflowStatus::Running => (None, None),
        WorkflowStatus::Completed(r) => (Some(r), None),
        WorkflowStatus::Errored(e) => (None, Some(e)),
    };
    Ok(Json(StatusResp {
        status: state_tag,
        result,
        error,
    }))
}

// ------------------------------------------------------------
// Chat (SSE)
// ------------------------------------------------------------

#[derive(Deserialize, Default)]
struct ChatConfig {
    #[serde(default)]
    model: String,
    // `systemMessage` is accepted for client compatibility; the mode decides the prompt.
}

#[derive(Deserialize)]
struct ChatReq {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    config: ChatConfig,
    #[serde(default)]
    mode: Option<ConversationMode>,
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatReq>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if body.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    let mode = body
        .mode
        .unwrap_or_else(|| ConversationMode::infer(&body.messages));
    let model = if body.config.model.trim().is_empty() {
        state.default_model.as_str()
    } else {
        body.config.model.trim()
    };

    let upstream = state
        .invoker
        .invoke(&body.messages, mode, model)
        .await
        .map_err(ApiError::Model)?;

    let events = relay(upstream).map(|frame| Ok::<_, Infallible>(Event::default().data(frame.data())));
    Ok(Sse::new(events))
}

// ------------------------------------------------------------
// Conversation persistence
// ------------------------------------------------------------

#[derive(Serialize)]
struct MessagesResp {
    messages: Vec<StoredMessage>,
}

#[derive(Serialize)]
struct SuccessResp {
    success: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveReq {
    #[serde(alias = "chatId")]
    conversation_id: String,
    messages: Vec<ChatMessage>,
}

async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<MessagesResp>, ApiError> {
    let messages = state.store.list(&conversation_id).await?;
    Ok(Json(MessagesResp { messages }))
}

async fn save_messages(
    State(state): State<AppState>,
    Json(body): Json<SaveReq>,
) -> Result<Json<SuccessResp>, ApiError> {
    if body.conversation_id.trim().is_empty() {
        warn!("save_messages without conversation id");
        return Err(ApiError::BadRequest("conversationId is required".to_string()));
    }
    state
        .store
        .replace(&body.conversation_id, &body.messages)
        .await?;
    Ok(Json(SuccessResp { success: true }))
}

async fn clear_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<SuccessResp>, ApiError> {
    state.store.clear(&conversation_id).await?;
    Ok(Json(SuccessResp { success: true }))
}
