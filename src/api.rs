//! HTTP API powered by axum.
//!
//! Serves:
//! - `GET    /test`: liveness check
//! - `GET    /health`: status and live session count
//! - `GET    /api/v1/agents`: available agent types
//! - `POST   /api/v1/conversations/{id}/agent`: select an agent
//! - `POST   /api/v1/conversations/{id}/messages`: send a message
//! - `DELETE /api/v1/conversations/{id}`: drop the current session
//!
//! When a token is configured, `/api/v1` routes require `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::agent::service::session_ready_message;
use crate::agent::{AgentDescriptor, AgentError, AgentService, ConversationId, ProcessingFailure, Reply, Selection};
use crate::config::HttpApiConfig;

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub agent_type: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

type ApiError = (StatusCode, Json<Value>);

fn error_response(err: &AgentError) -> ApiError {
    let status = match err {
        AgentError::UnknownAgentType(_) => StatusCode::NOT_FOUND,
        AgentError::Construction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AgentError::NoActiveSession => StatusCode::CONFLICT,
        AgentError::AgentProcessing(ProcessingFailure::Failed(_)) => StatusCode::BAD_GATEWAY,
        AgentError::AgentProcessing(ProcessingFailure::TimedOut(_)) => StatusCode::GATEWAY_TIMEOUT,
    };
    (status, Json(json!({ "error": err.user_message() })))
}

fn check_auth(headers: &HeaderMap, token: Option<&str>) -> Result<(), StatusCode> {
    let Some(expected) = token else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(t) if t == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn require_token(
    State(token): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    check_auth(request.headers(), token.as_deref())?;
    Ok(next.run(request).await)
}

/// Build the router over a shared service. `token`, if set, guards the `/api/v1` routes.
pub fn build_router(service: Arc<AgentService>, token: Option<&str>) -> Router {
    let token: Option<Arc<str>> = token.map(Arc::from);
    let api = Router::new()
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/conversations/{id}/agent", post(select_agent))
        .route("/api/v1/conversations/{id}/messages", post(send_message))
        .route("/api/v1/conversations/{id}", delete(reset_conversation))
        .route_layer(middleware::from_fn_with_state(token, require_token));

    Router::new()
        .route("/test", get(hello))
        .route("/health", get(health))
        .merge(api)
        .with_state(service)
}

/// Serve the API until the process exits. Call from `tokio::spawn`.
pub async fn serve(config: HttpApiConfig, service: Arc<AgentService>) -> std::io::Result<()> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    info!("🌍 HTTP API listening on http://{}", addr);
    if config.token.is_none() && !addr.ip().is_loopback() {
        warn!("HTTP API on {} has no token; anyone who can reach it can drive the agents", addr);
    }
    axum::serve(listener, build_router(service, config.token.as_deref())).await
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

async fn health(State(service): State<Arc<AgentService>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": service.registry().len(),
    }))
}

async fn list_agents(State(service): State<Arc<AgentService>>) -> Json<Vec<AgentDescriptor>> {
    Json(service.agent_types())
}

async fn select_agent(
    State(service): State<Arc<AgentService>>,
    Path(id): Path<String>,
    Json(body): Json<SelectRequest>,
) -> Result<Json<Value>, ApiError> {
    let conversation = ConversationId::api(&id);
    match service.select_agent(&conversation, body.agent_type.trim()).await {
        Ok(Selection::Selected(session)) => Ok(Json(json!({
            "status": "selected",
            "agent_type": session.agent_type,
            "session_id": session.session_id.to_string(),
        }))),
        Ok(Selection::AwaitingUrl { agent_type }) => Ok(Json(json!({
            "status": "awaiting_url",
            "agent_type": agent_type,
        }))),
        Err(e) => Err(error_response(&e)),
    }
}

async fn send_message(
    State(service): State<Arc<AgentService>>,
    Path(id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if body.text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "text must be non-empty" })),
        ));
    }

    let conversation = ConversationId::api(&id);
    match service.handle_text(&conversation, &body.text).await {
        Ok(Reply::Agent(reply)) => Ok(Json(MessageResponse { reply, session_id: None })),
        Ok(Reply::SessionReady(session)) => Ok(Json(MessageResponse {
            reply: session_ready_message(&session),
            session_id: Some(session.session_id.to_string()),
        })),
        Err(e) => Err(error_response(&e)),
    }
}

async fn reset_conversation(
    State(service): State<Arc<AgentService>>,
    Path(id): Path<String>,
) -> StatusCode {
    service.reset(&ConversationId::api(&id)).await;
    StatusCode::NO_CONTENT
}
