//! Upload, listing and summary handlers.

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use filecast_core::model::{overview_key, upload_key, user_prefix};
use filecast_core::{FilecastError, ObjectLocation};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::auth::AuthUser;
use crate::state::AppState;

type ApiError = (StatusCode, String);

fn bad_request(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub file: Option<String>,
}

/// Store the multipart `file` field and queue it for analysis.
///
/// The analysis task is submitted in the background; queue trouble never
/// changes the response once the bytes are stored.
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("failed to get file"))?;
        let key = upload_key(&user_id, &file_name).map_err(bad_request)?;
        let bytes = field.bytes().await.map_err(bad_request)?;
        let location = ObjectLocation::new(&state.bucket, key);

        if let Err(e) = state.store.put(&location, bytes.to_vec()).await {
            error!(error = %e, %location, user_id = %user_id, "Upload failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "upload failed".to_string()));
        }
        info!(%location, user_id = %user_id, bytes = bytes.len(), "File uploaded");

        let stored_name = location
            .key
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let emitter = state.emitter.clone();
        tokio::spawn(async move {
            emitter.emit(&location, &user_id).await;
        });

        return Ok(Json(json!({
            "message": "file uploaded successfully",
            "file": stored_name,
        })));
    }

    Err(bad_request("failed to get file"))
}

/// Keys of the caller's stored files.
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let objects = state
        .store
        .list(&state.bucket, &user_prefix(&user_id))
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user_id, "Failed to list files");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to list files".to_string())
        })?;

    let files: Vec<String> = objects.into_iter().map(|o| o.key).collect();
    Ok(Json(json!({ "files": files })))
}

/// The analysis summary for one of the caller's uploads.
pub async fn get_summary(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Value>, ApiError> {
    let file = query
        .file
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| bad_request("missing file"))?;
    let key = overview_key(&upload_key(&user_id, &file).map_err(bad_request)?);
    let location = ObjectLocation::new(&state.bucket, key);

    match state.fetcher.fetch(&location).await {
        Ok(summary) => Ok(Json(json!({ "file": location.key, "summary": summary }))),
        Err(FilecastError::ObjectNotFound { .. }) => {
            Err((StatusCode::NOT_FOUND, "summary not ready".to_string()))
        }
        Err(e) => {
            error!(error = %e, %location, "Failed to fetch summary");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch summary".to_string()))
        }
    }
}
