//! Generated file and object storage handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use genledger_core::{FileId, GeneratedFile, StorageKey, User};

use super::jobs::FileResponse;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Load a file and check the caller owns it, by record and by key.
async fn owned_file(state: &AppState, user: &User, id: &FileId) -> Result<GeneratedFile, ApiError> {
    let file = state
        .store
        .get_file(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {id}")))?;

    if file.owner_id != user.id || !file.storage_key.is_owned_by(&user.id) {
        return Err(ApiError::Forbidden);
    }
    Ok(file)
}

/// File metadata with a presigned download URL.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<FileId>,
) -> Result<Json<FileResponse>, ApiError> {
    let file = owned_file(&state, &auth.user, &id).await?;

    let ttl = Duration::from_secs(state.config.presign_ttl_seconds);
    let url = state.objects.presign_get(&file.storage_key, ttl).await?;

    let mut response = FileResponse::from(&file);
    response.url = Some(url);
    Ok(Json(response))
}

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    /// Whether the file was deleted.
    pub deleted: bool,
}

/// Delete a file's object and record.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<FileId>,
) -> Result<Json<DeleteFileResponse>, ApiError> {
    let file = owned_file(&state, &auth.user, &id).await?;

    state.objects.delete(&file.storage_key).await?;
    state.store.delete_file(&file.id).await?;

    tracing::info!(user_id = %auth.user.id, file_id = %file.id, key = %file.storage_key, "File deleted");

    Ok(Json(DeleteFileResponse { deleted: true }))
}

/// Object listing response.
#[derive(Debug, Serialize)]
pub struct ListObjectsResponse {
    /// Keys under the caller's prefix.
    pub keys: Vec<String>,
}

/// List the caller's objects.
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ListObjectsResponse>, ApiError> {
    let prefix = StorageKey::owner_prefix(&auth.user.id);
    let keys = state
        .objects
        .list(&prefix)
        .await?
        .into_iter()
        .filter(|raw| {
            raw.parse::<StorageKey>()
                .is_ok_and(|key| key.is_owned_by(&auth.user.id))
        })
        .collect();

    Ok(Json(ListObjectsResponse { keys }))
}
