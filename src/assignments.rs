//! Scheduling tasks into courses. A task carries at most one assignment per
//! course, each with its own due date.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{authorize, Action},
    courses::load_course,
    error::{AppError, AppResult},
    models::{AssignTaskReq, CourseTask, Principal, Task, UpdateDueDateReq},
    state::AppState,
    tasks::load_task,
};

/// A task as seen from one course.
#[derive(Serialize, Debug)]
pub struct CourseTaskView {
    #[serde(flatten)]
    pub task: Task,
    pub due_date: DateTime<Utc>,
    pub assigned_at: DateTime<Utc>,
}

pub fn parse_instant(raw: &str, field: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| AppError::Validation(format!("{field} must be an RFC 3339 timestamp, got {raw:?}")))
}

pub async fn assign(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    req: AssignTaskReq,
) -> AppResult<Task> {
    let course = load_course(state, course_id).await?;
    let task = load_task(state, req.task_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;

    let due_date = parse_instant(&req.due_date, "due_date")?;
    let assigned_at = match req.assigned_at.as_deref() {
        Some(raw) => {
            let start = parse_instant(raw, "assigned_at")?;
            if start >= due_date {
                return Err(AppError::validation("assigned_at must be before due_date"));
            }
            start
        }
        None => state.clock.now(),
    };
    if task.assignment(course_id).is_some() {
        return Err(AppError::conflict("task is already assigned to this course"));
    }
    let assignment = CourseTask {
        course_id,
        due_date,
        assigned_at,
    };
    state.repo.insert_assignment(task.id, &assignment).await?;
    info!(task_id = %task.id, course_id = %course_id, due_date = %due_date, "task assigned");
    load_task(state, task.id).await
}

/// Moves the deadline. The assignment start is only checked against a
/// deadline supplied in the same request, so any valid instant is accepted.
pub async fn update_due_date(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    task_id: Uuid,
    req: UpdateDueDateReq,
) -> AppResult<Task> {
    let course = load_course(state, course_id).await?;
    let task = load_task(state, task_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;

    if task.assignment(course_id).is_none() {
        return Err(AppError::NotFound("course assignment"));
    }
    let due_date = parse_instant(&req.due_date, "due_date")?;
    if !state.repo.update_due_date(task_id, course_id, due_date).await? {
        return Err(AppError::NotFound("course assignment"));
    }
    info!(task_id = %task_id, course_id = %course_id, due_date = %due_date, "due date moved");
    load_task(state, task_id).await
}

pub async fn unassign(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    task_id: Uuid,
) -> AppResult<()> {
    let course = load_course(state, course_id).await?;
    load_task(state, task_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;
    if !state.repo.delete_assignment(task_id, course_id).await? {
        return Err(AppError::NotFound("course assignment"));
    }
    info!(task_id = %task_id, course_id = %course_id, "task unassigned");
    Ok(())
}

pub async fn list_for_course(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
) -> AppResult<Vec<CourseTaskView>> {
    let course = load_course(state, course_id).await?;
    authorize(principal, Action::ReadCourse, Some(&course))?;
    let tasks = state.repo.list_course_tasks(course_id).await?;
    Ok(tasks
        .into_iter()
        .filter_map(|task| {
            let ct = task.assignment(course_id)?.clone();
            Some(CourseTaskView {
                task,
                due_date: ct.due_date,
                assigned_at: ct.assigned_at,
            })
        })
        .collect())
}
