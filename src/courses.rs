use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    artifacts::remove_file_logged,
    auth::{authorize, permits, Action},
    error::{AppError, AppResult},
    models::{Course, CreateCourseReq, JoinCourseReq, Principal, UpdateCourseReq},
    state::AppState,
};

const CODE_LEN: usize = 6;
const CODE_ATTEMPTS: usize = 8;

pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    (!code.is_empty()).then_some(code)
}

pub async fn load_course(state: &AppState, id: Uuid) -> AppResult<Course> {
    state
        .repo
        .get_course(id)
        .await?
        .ok_or(AppError::NotFound("course"))
}

/// The caller becomes the owner. A taken code, supplied or generated, is
/// silently replaced by a fresh one.
pub async fn create(state: &AppState, principal: &Principal, req: CreateCourseReq) -> AppResult<Course> {
    authorize(principal, Action::CreateCourse, None)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    let mut course = Course {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: req.description.unwrap_or_default(),
        code: req
            .code
            .as_deref()
            .and_then(normalize_code)
            .unwrap_or_else(generate_code),
        teacher_id: principal.id,
        students: Vec::new(),
        created_at: state.clock.now(),
    };
    for _ in 0..CODE_ATTEMPTS {
        match state.repo.insert_course(&course).await {
            Ok(()) => {
                info!(course_id = %course.id, code = %course.code, "course created");
                return Ok(course);
            }
            Err(AppError::Conflict(_)) => {
                warn!(code = %course.code, "course code taken, regenerating");
                course.code = generate_code();
            }
            Err(e) => return Err(e),
        }
    }
    Err(AppError::storage("could not allocate a unique course code"))
}

pub async fn get(state: &AppState, principal: &Principal, id: Uuid) -> AppResult<Course> {
    let course = load_course(state, id).await?;
    authorize(principal, Action::ReadCourse, Some(&course))?;
    Ok(course)
}

pub async fn list(state: &AppState, principal: &Principal) -> AppResult<Vec<Course>> {
    let courses = state.repo.list_courses().await?;
    Ok(courses
        .into_iter()
        .filter(|c| permits(principal, Action::ReadCourse, Some(c)))
        .collect())
}

pub async fn update(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
    req: UpdateCourseReq,
) -> AppResult<Course> {
    let mut course = load_course(state, id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    if let Some(name) = req.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name cannot be empty"));
        }
        course.name = name.to_string();
    }
    if let Some(description) = req.description {
        course.description = description;
    }
    state.repo.update_course(&course).await?;
    Ok(course)
}

/// Material files go first (failures are logged and skipped), then every
/// row that belongs to the course.
pub async fn delete(state: &AppState, principal: &Principal, id: Uuid) -> AppResult<()> {
    let course = load_course(state, id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;

    let folders = state.repo.list_folders(id).await?;
    let mut files = 0usize;
    for folder in &folders {
        for material in state.repo.list_materials(folder.id).await? {
            remove_file_logged(&state.artifacts.material_path(&material.stored_path)).await;
            files += 1;
        }
    }
    state
        .artifacts
        .discard(&state.artifacts.course_materials_dir(id))
        .await;

    if !state.repo.delete_course(id).await? {
        return Err(AppError::NotFound("course"));
    }
    info!(course_id = %id, folders = folders.len(), files, "course deleted");
    Ok(())
}

pub async fn join(state: &AppState, principal: &Principal, req: JoinCourseReq) -> AppResult<Course> {
    authorize(principal, Action::Enroll, None)?;
    let code = normalize_code(&req.code).ok_or_else(|| AppError::validation("code is required"))?;
    let course = state
        .repo
        .find_course_by_code(&code)
        .await?
        .ok_or(AppError::NotFound("course"))?;
    state.repo.add_student(course.id, principal.id).await?;
    info!(course_id = %course.id, student = %principal.id, "student enrolled");
    load_course(state, course.id).await
}

pub async fn remove_student(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    student_id: Uuid,
) -> AppResult<()> {
    let course = load_course(state, course_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    if !state.repo.remove_student(course_id, student_id).await? {
        return Err(AppError::NotFound("enrollment"));
    }
    Ok(())
}
