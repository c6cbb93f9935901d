//! Tenant data handlers

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;

use crate::AppState;
use datachat_common::{
    auth::SessionContext,
    errors::{AppError, Result},
    runtime::{DatabaseInfo, LoadSummary},
    tenant::SchemaInfo,
};

/// Multipart field carrying the uploaded file
const FILE_FIELD: &str = "file";

#[derive(Serialize)]
pub struct LoadResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: LoadSummary,
}

/// Body-limit overflows surface as 413; everything else is a malformed upload
fn multipart_error(err: MultipartError, declared: Option<usize>, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge {
            size: declared.unwrap_or(limit),
            limit,
        };
    }
    AppError::InvalidFormat {
        message: err.body_text(),
    }
}

/// Replace a table with the contents of an uploaded CSV file
pub async fn upload(
    State(state): State<AppState>,
    ctx: SessionContext,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<LoadResponse>> {
    let limit = state.runtime.config().server.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(size) = declared.filter(|size| *size > limit + crate::MULTIPART_OVERHEAD) {
        return Err(AppError::PayloadTooLarge { size, limit });
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, declared, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation {
                message: "uploaded file has no name".to_string(),
                field: Some(FILE_FIELD.to_string()),
            })?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, declared, limit))?;
        if bytes.len() > limit {
            return Err(AppError::PayloadTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let summary = state
            .runtime
            .load_upload(&ctx.session, &file_name, &bytes)
            .await?;

        return Ok(Json(LoadResponse {
            message: format!("Successfully uploaded {}", file_name),
            summary,
        }));
    }

    Err(AppError::Validation {
        message: format!("multipart field '{}' is required", FILE_FIELD),
        field: Some(FILE_FIELD.to_string()),
    })
}

/// Replace tables with the built-in sample dataset
pub async fn sample_data(
    State(state): State<AppState>,
    ctx: SessionContext,
) -> Result<Json<LoadResponse>> {
    let summary = state.runtime.load_sample(&ctx.session).await?;

    Ok(Json(LoadResponse {
        message: "Sample data created successfully".to_string(),
        summary,
    }))
}

/// Tables, columns, counts and preview rows
pub async fn info(
    State(state): State<AppState>,
    ctx: SessionContext,
) -> Result<Json<DatabaseInfo>> {
    Ok(Json(state.runtime.database_info(&ctx.session).await?))
}

/// Live table/column inventory
pub async fn schema(
    State(state): State<AppState>,
    ctx: SessionContext,
) -> Result<Json<SchemaInfo>> {
    Ok(Json(state.runtime.database_schema(&ctx.session).await?))
}
