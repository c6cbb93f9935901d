//! Session login/logout handlers

use axum::{
    extract::{Request, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use datachat_common::{auth::session_token, errors::Result};

/// Login request; the username is the tenant identity
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub username: String,
    pub created_at: String,
    pub idle_timeout_secs: u64,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Start a session for the given username
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    request.validate()?;

    let session = state.runtime.login(&request.username)?;

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            session_id: session.session_id.to_string(),
            username: session.tenant_id.to_string(),
            created_at: session.created_at.to_rfc3339(),
            idle_timeout_secs: state.runtime.sessions().idle_timeout().as_secs(),
        }),
    ))
}

/// End the presented session; unknown or missing tokens are not an error
pub async fn logout(State(state): State<AppState>, request: Request) -> Json<LogoutResponse> {
    let (parts, _) = request.into_parts();
    let logged_out = session_token(&parts)
        .map(|token| state.runtime.logout(&token))
        .unwrap_or(false);

    Json(LogoutResponse { logged_out })
}
