//! Session authentication utilities
//!
//! Provides:
//! - Session token generation
//! - Token extraction from a request (bearer header, `X-Session-ID`, query)
//! - The [`SessionContext`] extractor resolving a token into a live session

use crate::errors::{AppError, Result};
use crate::runtime::Runtime;
use crate::session::Session;
use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;
use std::sync::Arc;

/// Header carrying the session token when no bearer token is sent
pub const SESSION_HEADER: &str = "x-session-id";

/// Query parameter carrying the session token
pub const SESSION_QUERY_PARAM: &str = "session_id";

/// Generate a new session token from OS randomness
pub fn generate_session_token() -> String {
    let random_bytes: [u8; 24] = rand::random();
    format!("sess_{}", hex::encode(random_bytes))
}

/// Extract the token from an Authorization header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

/// Session token presented by a request, if any
pub fn session_token(parts: &Parts) -> Option<String> {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(token) = header("authorization").and_then(extract_bearer) {
        return Some(token.to_string());
    }
    if let Some(token) = header(SESSION_HEADER) {
        return Some(token.to_string());
    }
    Query::<SessionQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.session_id)
        .filter(|token| !token.is_empty())
}

/// Authenticated session available to handlers
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
}

/// Axum extractor for SessionContext
impl<S> FromRequestParts<S> for SessionContext
where
    Arc<Runtime>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let token = session_token(parts).ok_or_else(|| AppError::Unauthorized {
            message: "Not authenticated".to_string(),
        })?;

        let runtime = Arc::<Runtime>::from_ref(state);
        let session = runtime.authenticate(&token)?;
        Ok(SessionContext { session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_generate_session_token() {
        let token = generate_session_token();
        assert!(token.starts_with("sess_"));
        assert_eq!(token.len(), 5 + 48);
        assert_ne!(token, generate_session_token());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer sess_123"), Some("sess_123"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("sess_123"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_token_sources_in_order() {
        let all = parts(
            Request::builder()
                .uri("/chat?session_id=from_query")
                .header("authorization", "Bearer from_bearer")
                .header(SESSION_HEADER, "from_header")
                .body(())
                .unwrap(),
        );
        assert_eq!(session_token(&all).as_deref(), Some("from_bearer"));

        let header_only = parts(
            Request::builder()
                .uri("/chat?session_id=from_query")
                .header(SESSION_HEADER, "from_header")
                .body(())
                .unwrap(),
        );
        assert_eq!(session_token(&header_only).as_deref(), Some("from_header"));

        let query_only = parts(Request::builder().uri("/chat?session_id=from_query").body(()).unwrap());
        assert_eq!(session_token(&query_only).as_deref(), Some("from_query"));

        let none = parts(Request::builder().uri("/chat").body(()).unwrap());
        assert_eq!(session_token(&none), None);
    }

    #[tokio::test]
    async fn test_extractor_resolves_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.root_dir = dir.path().to_path_buf();
        let runtime = Arc::new(Runtime::new(config).unwrap());
        let session = runtime.login("alice").unwrap();

        let mut ok = parts(
            Request::builder()
                .uri("/database/info")
                .header("authorization", format!("Bearer {}", session.session_id))
                .body(())
                .unwrap(),
        );
        let ctx = SessionContext::from_request_parts(&mut ok, &runtime).await.unwrap();
        assert_eq!(ctx.session.tenant_id.as_str(), "alice");

        let mut missing = parts(Request::builder().uri("/database/info").body(()).unwrap());
        assert!(matches!(
            SessionContext::from_request_parts(&mut missing, &runtime).await,
            Err(AppError::Unauthorized { .. })
        ));

        let mut unknown = parts(
            Request::builder()
                .uri("/database/info")
                .header(SESSION_HEADER, "sess_unknown")
                .body(())
                .unwrap(),
        );
        assert!(matches!(
            SessionContext::from_request_parts(&mut unknown, &runtime).await,
            Err(AppError::SessionNotFound { .. })
        ));
    }
}
