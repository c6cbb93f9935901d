//! Chat handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use datachat_common::{
    auth::SessionContext,
    errors::{AppError, Result},
    tenant::Row,
};

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_executed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Forward one message to the session's agent
pub async fn chat(
    State(state): State<AppState>,
    ctx: SessionContext,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    request.validate()?;
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation {
            message: "Message cannot be empty".to_string(),
            field: Some("message".to_string()),
        });
    }

    let reply = state.runtime.chat(&ctx.session, message).await?;

    Ok(Json(ChatResponse {
        response: reply.answer,
        query_executed: reply.executed_sql,
        row_count: reply.rows.as_ref().map(Vec::len),
        results: reply.rows,
        error: reply.error,
    }))
}
