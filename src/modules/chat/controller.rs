use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{SecondsFormat, Utc};

use crate::error::{AppError, ErrorReply};
use crate::modules::chat::schema::{
    ChatRequest, ChatResponse, HealthResponse, MessageResponse, MessagesResponse, ResetResponse,
};
use crate::security::identity::client_identity;
use crate::AppState;

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ErrorReply> {
    let client_id = client_identity(&headers);
    tracing::info!(client_id = %client_id, "chat request received");

    let request = payload.map(|Json(p)| p).map_err(|e| e.body_text());

    let outcome = state
        .pipeline
        .relay(&client_id, request)
        .await
        .map_err(|e| e.reply(state.environment))?;

    Ok(Json(ChatResponse {
        success: true,
        user_message: MessageResponse::from(&outcome.user_message),
        assistant_message: MessageResponse::from(&outcome.assistant_message),
    }))
}

pub async fn list_messages(
    State(state): State<AppState>,
) -> Result<Json<MessagesResponse>, ErrorReply> {
    let messages = state.store.list_messages(None).await.map_err(|e| {
        tracing::error!(error = %e, "failed to list messages");
        AppError::from(e).reply(state.environment)
    })?;

    Ok(Json(MessagesResponse {
        success: true,
        messages: messages.iter().map(MessageResponse::from).collect(),
    }))
}

pub async fn reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, ErrorReply> {
    let deleted_count = state.store.delete_all().await.map_err(|e| {
        tracing::error!(error = %e, "failed to reset conversation");
        AppError::from(e).reply(state.environment)
    })?;

    tracing::info!(deleted_count, "conversation reset");

    Ok(Json(ResetResponse {
        success: true,
        deleted_count,
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
