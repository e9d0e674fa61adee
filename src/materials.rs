//! Course folders and the documents filed in them.

use axum::{
    extract::{Multipart, Request},
    http::{header, HeaderValue},
    response::Response,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    artifacts::remove_file_logged,
    auth::{authorize, Action},
    courses::load_course,
    error::{AppError, AppResult},
    models::{Course, Folder, FolderReq, Material, Principal},
    serve::send_file,
    state::AppState,
    upload::{receive_single, within, UploadChannel},
};

fn clean_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::validation("folder name is required"));
    }
    Ok(name.to_string())
}

/// Folder plus the course it belongs to.
async fn load_folder(state: &AppState, id: Uuid) -> AppResult<(Folder, Course)> {
    let folder = state
        .repo
        .get_folder(id)
        .await?
        .ok_or(AppError::NotFound("folder"))?;
    let course = load_course(state, folder.course_id).await?;
    Ok((folder, course))
}

async fn load_material(state: &AppState, id: Uuid) -> AppResult<(Material, Course)> {
    let material = state
        .repo
        .get_material(id)
        .await?
        .ok_or(AppError::NotFound("material"))?;
    let course = load_course(state, material.course_id).await?;
    Ok((material, course))
}

pub async fn create_folder(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    req: FolderReq,
) -> AppResult<Folder> {
    let course = load_course(state, course_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    let folder = Folder {
        id: Uuid::new_v4(),
        course_id,
        name: clean_name(&req.name)?,
        created_at: state.clock.now(),
    };
    state.repo.insert_folder(&folder).await?;
    info!(course_id = %course_id, folder_id = %folder.id, "folder created");
    Ok(folder)
}

pub async fn list_folders(state: &AppState, principal: &Principal, course_id: Uuid) -> AppResult<Vec<Folder>> {
    let course = load_course(state, course_id).await?;
    authorize(principal, Action::ReadCourse, Some(&course))?;
    state.repo.list_folders(course_id).await
}

pub async fn rename_folder(
    state: &AppState,
    principal: &Principal,
    folder_id: Uuid,
    req: FolderReq,
) -> AppResult<Folder> {
    let (mut folder, course) = load_folder(state, folder_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    folder.name = clean_name(&req.name)?;
    if !state.repo.rename_folder(folder_id, &folder.name).await? {
        return Err(AppError::NotFound("folder"));
    }
    Ok(folder)
}

/// Files of the folder's materials go first, then the rows.
pub async fn delete_folder(state: &AppState, principal: &Principal, folder_id: Uuid) -> AppResult<()> {
    let (_, course) = load_folder(state, folder_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    let materials = state.repo.list_materials(folder_id).await?;
    for material in &materials {
        remove_file_logged(&state.artifacts.material_path(&material.stored_path)).await;
    }
    if !state.repo.delete_folder(folder_id).await? {
        return Err(AppError::NotFound("folder"));
    }
    info!(folder_id = %folder_id, materials = materials.len(), "folder deleted");
    Ok(())
}

/// Stores one document under `<course>/<uuid>.<ext>` in the materials tree.
/// A `title` text field names it; the original file name is the fallback.
pub async fn upload(
    state: &AppState,
    principal: &Principal,
    folder_id: Uuid,
    mp: &mut Multipart,
) -> AppResult<Material> {
    let (folder, course) = load_folder(state, folder_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;

    let id = Uuid::new_v4();
    // the extension is only known once the part header has been read, so the
    // body lands under a neutral name and is renamed afterwards
    let partial = format!("{}/{id}.part", course.id);
    let partial_path = state.artifacts.material_path(&partial);
    let received = within(
        state.config.upload_timeout,
        receive_single(mp, UploadChannel::Material, &partial_path),
    )
    .await;
    let (file, fields) = match received {
        Ok(received) => received,
        Err(e) => {
            remove_file_logged(&partial_path).await;
            return Err(e);
        }
    };

    let stored_path = match file.part.file_name.rsplit_once('.') {
        Some((_, ext)) => format!("{}/{id}.{}", course.id, ext.to_ascii_lowercase()),
        None => format!("{}/{id}", course.id),
    };
    let stored = state.artifacts.material_path(&stored_path);
    if let Err(e) = tokio::fs::rename(&file.path, &stored).await {
        remove_file_logged(&file.path).await;
        return Err(AppError::storage(format!("storing material: {e}")));
    }

    let title = fields
        .get("title")
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(&file.part.file_name)
        .to_string();
    let material = Material {
        id,
        folder_id: folder.id,
        course_id: course.id,
        title,
        original_name: file.part.file_name.clone(),
        stored_path,
        content_type: file.part.content_type.clone(),
        size_bytes: file.size as i64,
        uploaded_at: state.clock.now(),
    };
    if let Err(e) = state.repo.insert_material(&material).await {
        remove_file_logged(&stored).await;
        return Err(e);
    }
    info!(material_id = %id, folder_id = %folder.id, size = file.size, "material uploaded");
    Ok(material)
}

pub async fn list_materials(state: &AppState, principal: &Principal, folder_id: Uuid) -> AppResult<Vec<Material>> {
    let (_, course) = load_folder(state, folder_id).await?;
    authorize(principal, Action::ReadCourse, Some(&course))?;
    state.repo.list_materials(folder_id).await
}

pub async fn download(state: &AppState, principal: &Principal, material_id: Uuid, req: Request) -> AppResult<Response> {
    let (material, course) = load_material(state, material_id).await?;
    authorize(principal, Action::ReadCourse, Some(&course))?;
    let path = state.artifacts.material_path(&material.stored_path);
    let mut res = send_file(&path, &material.content_type, req).await?;
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&material.original_name)) {
        res.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(res)
}

/// The file goes first; a missing file does not keep the row alive.
pub async fn delete(state: &AppState, principal: &Principal, material_id: Uuid) -> AppResult<()> {
    let (material, course) = load_material(state, material_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    remove_file_logged(&state.artifacts.material_path(&material.stored_path)).await;
    if !state.repo.delete_material(material_id).await? {
        return Err(AppError::NotFound("material"));
    }
    info!(material_id = %material_id, "material deleted");
    Ok(())
}

fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' { c } else { '_' })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
