//! Hands build files to the browser's WebGL loader. What exists is decided
//! by the task record; the disk is only consulted for the recorded paths.

use std::path::Path;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use uuid::Uuid;

use crate::{
    artifacts::{is_file, list_files},
    error::{AppError, AppResult},
    models::{BuildRole, Principal},
    state::AppState,
    tasks::{authorize_read, load_task},
};

pub fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".js") {
        "application/javascript"
    } else if lower.ends_with(".wasm") {
        "application/wasm"
    } else {
        "application/octet-stream"
    }
}

#[derive(Serialize, Debug)]
pub struct RoleStatus {
    pub role: BuildRole,
    pub path: Option<String>,
    pub present: bool,
}

#[derive(Serialize, Debug)]
pub struct BuildMetadata {
    pub task_id: Uuid,
    pub roles: Vec<RoleStatus>,
    pub files_on_disk: usize,
    /// Loader and data are recorded and both files exist.
    pub servable: bool,
}

pub async fn build_metadata(state: &AppState, principal: &Principal, task_id: Uuid) -> AppResult<BuildMetadata> {
    let task = load_task(state, task_id).await?;
    authorize_read(state, principal, &task).await?;

    let mut roles = Vec::with_capacity(BuildRole::ALL.len());
    for role in BuildRole::ALL {
        let path = task.build.path(role).map(str::to_string);
        let present = match path.as_deref().and_then(|p| state.artifacts.resolve_served(p)) {
            Some(disk) => is_file(&disk).await,
            None => false,
        };
        roles.push(RoleStatus { role, path, present });
    }
    let dir = state.artifacts.build_dir(task_id);
    let files_on_disk = tokio::task::spawn_blocking(move || list_files(&dir).len())
        .await
        .map_err(|e| AppError::storage(format!("listing build files: {e}")))?;
    let ready = |r: BuildRole| roles.iter().any(|s| s.role == r && s.present);
    let servable = ready(BuildRole::Loader) && ready(BuildRole::Data);
    Ok(BuildMetadata {
        task_id,
        roles,
        files_on_disk,
        servable,
    })
}

/// Streams one build-role file with cross-origin headers.
pub async fn build_file(state: &AppState, task_id: Uuid, role: BuildRole, req: Request) -> AppResult<Response> {
    let task = load_task(state, task_id).await?;
    let served = task.build.path(role).ok_or(AppError::NotFound("build file"))?;
    let disk = state
        .artifacts
        .resolve_served(served)
        .ok_or(AppError::NotFound("build file"))?;
    let mut res = send_file(&disk, content_type_for(served), req).await?;
    let headers = res.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        "cross-origin-resource-policy",
        HeaderValue::from_static("cross-origin"),
    );
    Ok(res)
}

/// Streams a file from disk, honouring range and conditional headers of `req`.
pub async fn send_file(path: &Path, content_type: &str, req: Request) -> AppResult<Response> {
    if !is_file(path).await {
        return Err(AppError::NotFound("file"));
    }
    let res = match ServeFile::new(path).oneshot(req).await {
        Ok(res) => res,
        Err(never) => match never {},
    };
    if res.status() == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound("file"));
    }
    let mut res = res.map(Body::new);
    let value = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    res.headers_mut().insert(header::CONTENT_TYPE, value);
    Ok(res)
}
