use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use shared_types::File;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    dto::{DeleteFileResponse, ListFilesResponse, ListParams, WriteFileRequest},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const FILE_PATH_HEADER: &str = "file-path";
pub const FILE_REVISION_HEADER: &str = "file-revision";

fn file_path(path: &str) -> ApiResult<String> {
    if path.is_empty() || path.ends_with('/') {
        return Err(ApiError::BadRequest(format!(
            "'{path}' does not name a file"
        )));
    }
    Ok(store::normalize_key(path))
}

/// JSON body plus the file's path and revision as headers
fn file_response(status: StatusCode, file: File) -> Response {
    let mut response = (status, Json(&file)).into_response();
    let headers = response.headers_mut();
    match HeaderValue::from_str(&file.path) {
        Ok(path) => {
            headers.insert(HeaderName::from_static(FILE_PATH_HEADER), path);
        }
        Err(_) => debug!(
            path = %file.path,
            "path is not a valid header value, omitting {FILE_PATH_HEADER} header"
        ),
    }
    headers.insert(
        HeaderName::from_static(FILE_REVISION_HEADER),
        HeaderValue::from(file.revision),
    );
    response
}

/// GET /files/*path
#[instrument(skip(state))]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let path = file_path(&path)?;
    info!("Getting file: {}", path);

    let ctx = state.request_context();
    let file = state.files.get_file(&ctx, &path).await?;

    Ok(file_response(StatusCode::OK, file))
}

/// GET /files
/// List files with optional prefix filtering
#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListFilesResponse>> {
    info!("Listing files with prefix: {:?}", params.prefix);

    let ctx = state.request_context();
    let prefix = params.prefix.as_deref().unwrap_or("/");
    let (files, revision) = state.files.list_files(&ctx, prefix).await?;

    Ok(Json(ListFilesResponse { files, revision }))
}

/// POST /files/*path
/// Create a file that does not exist yet
#[instrument(skip(state, request))]
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<Response> {
    let path = file_path(&path)?;
    info!("Creating file: {}", path);

    if request.expected_revision.is_some() {
        return Err(ApiError::BadRequest(
            "expected_revision only applies to updates".to_string(),
        ));
    }

    let ctx = state.request_context();
    let file = state
        .files
        .create_file(&ctx, &path, request.contents, request.metadata)
        .await?;

    Ok(file_response(StatusCode::CREATED, file))
}

/// PUT /files/*path
/// Replace an existing file, optionally guarded by `expected_revision`
#[instrument(skip(state, request))]
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<Response> {
    let path = file_path(&path)?;
    info!(
        "Updating file: {} (expected revision {:?})",
        path, request.expected_revision
    );

    let ctx = state.request_context();
    let file = state
        .files
        .update_file(
            &ctx,
            &path,
            request.contents,
            request.metadata,
            request.expected_revision,
        )
        .await?;

    Ok(file_response(StatusCode::OK, file))
}

/// DELETE /files/*path
#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Json<DeleteFileResponse>> {
    let path = file_path(&path)?;
    info!("Deleting file: {}", path);

    let ctx = state.request_context();
    let revision = state.files.delete_file(&ctx, &path).await?;

    Ok(Json(DeleteFileResponse { path, revision }))
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "file-store",
        "store": state.files.store().to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
