use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{authorize, permits, Action},
    error::{AppError, AppResult},
    models::{BuildState, CreateTaskReq, Principal, Role, Task, UpdateTaskReq},
    state::AppState,
};

pub const DEFAULT_SCORE: i32 = 100;

fn clean_title(raw: &str) -> AppResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::validation("title is required"));
    }
    Ok(title.to_string())
}

fn check_score(score: i32) -> AppResult<i32> {
    if score <= 0 {
        return Err(AppError::validation("score must be positive"));
    }
    Ok(score)
}

pub async fn load_task(state: &AppState, id: Uuid) -> AppResult<Task> {
    state
        .repo
        .get_task(id)
        .await?
        .ok_or(AppError::NotFound("task"))
}

/// Staff read any task; students only tasks assigned to a course they are in.
pub async fn authorize_read(state: &AppState, principal: &Principal, task: &Task) -> AppResult<()> {
    if principal.role != Role::Student {
        return Ok(());
    }
    for ct in &task.course_tasks {
        if let Some(course) = state.repo.get_course(ct.course_id).await? {
            if permits(principal, Action::ReadCourse, Some(&course)) {
                return Ok(());
            }
        }
    }
    Err(AppError::forbidden("this task is not assigned to any of your courses"))
}

pub async fn create(state: &AppState, principal: &Principal, req: CreateTaskReq) -> AppResult<Task> {
    authorize(principal, Action::ManageTask, None)?;
    let now = state.clock.now();
    let task = Task {
        id: Uuid::new_v4(),
        title: clean_title(&req.title)?,
        description: req.description.unwrap_or_default(),
        score: check_score(req.score.unwrap_or(DEFAULT_SCORE))?,
        course_tasks: Vec::new(),
        build: BuildState::default(),
        created_at: now,
        updated_at: now,
    };
    state.repo.insert_task(&task).await?;
    info!(task_id = %task.id, title = %task.title, "task created");
    Ok(task)
}

pub async fn get(state: &AppState, principal: &Principal, id: Uuid) -> AppResult<Task> {
    let task = load_task(state, id).await?;
    authorize_read(state, principal, &task).await?;
    Ok(task)
}

pub async fn list(state: &AppState, principal: &Principal) -> AppResult<Vec<Task>> {
    authorize(principal, Action::BrowseTasks, None)?;
    state.repo.list_tasks().await
}

pub async fn update(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
    req: UpdateTaskReq,
) -> AppResult<Task> {
    authorize(principal, Action::ManageTask, None)?;
    let mut task = load_task(state, id).await?;
    if let Some(title) = req.title {
        task.title = clean_title(&title)?;
    }
    if let Some(description) = req.description {
        task.description = description;
    }
    if let Some(score) = req.score {
        task.score = check_score(score)?;
    }
    task.updated_at = state.clock.now();
    state.repo.update_task(&task).await?;
    Ok(task)
}

/// Removes the build directory first, then the task row together with its
/// course assignments and submissions. Holds the task's build lock so no
/// upload can land in between.
pub async fn delete(state: &AppState, principal: &Principal, id: Uuid) -> AppResult<()> {
    authorize(principal, Action::ManageTask, None)?;
    let _guard = state.locks.acquire(id).await;
    let task = load_task(state, id).await?;
    state.assembler().remove_build(&task).await;
    if !state.repo.delete_task(id).await? {
        return Err(AppError::NotFound("task"));
    }
    info!(task_id = %id, courses = task.course_tasks.len(), "task deleted");
    Ok(())
}
