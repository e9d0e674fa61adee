//! Student hand-ins. A submission is `submitted` or `late` depending on when
//! it was last (re)submitted against the due date of the course assignment
//! it targets; grading never changes the status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{authorize, Action},
    courses::load_course,
    error::{AppError, AppResult},
    models::{Course, GradeReq, Principal, Submission, SubmissionStatus, Task},
    state::AppState,
    tasks::load_task,
};

pub fn derive_status(now: DateTime<Utc>, due_date: DateTime<Utc>) -> SubmissionStatus {
    if now > due_date {
        SubmissionStatus::Late
    } else {
        SubmissionStatus::Submitted
    }
}

#[derive(Serialize, Debug)]
pub struct SubmissionRoster {
    pub task_id: Uuid,
    pub course_id: Uuid,
    pub due_date: DateTime<Utc>,
    pub submissions: Vec<Submission>,
    pub not_submitted: Vec<Uuid>,
}

async fn load(state: &AppState, course_id: Uuid, task_id: Uuid) -> AppResult<(Course, Task)> {
    let course = load_course(state, course_id).await?;
    let task = load_task(state, task_id).await?;
    Ok((course, task))
}

fn due_date(task: &Task, course_id: Uuid) -> AppResult<DateTime<Utc>> {
    task.assignment(course_id)
        .map(|a| a.due_date)
        .ok_or(AppError::NotFound("course assignment"))
}

pub async fn submit(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    task_id: Uuid,
) -> AppResult<Submission> {
    let (course, task) = load(state, course_id, task_id).await?;
    let due = due_date(&task, course_id)?;
    authorize(principal, Action::Submit, Some(&course))?;

    if state.repo.find_submission(principal.id, task_id).await?.is_some() {
        return Err(AppError::conflict(
            "task already submitted; update the submission instead",
        ));
    }
    let now = state.clock.now();
    let submission = Submission {
        id: Uuid::new_v4(),
        student_id: principal.id,
        task_id,
        course_id,
        grade: None,
        status: derive_status(now, due),
        submitted_at: now,
    };
    state.repo.insert_submission(&submission).await?;
    info!(task_id = %task_id, course_id = %course_id, status = submission.status.as_str(), "task submitted");
    Ok(submission)
}

/// Re-submission. The status is derived again from the current time and any
/// previous grade is cleared.
pub async fn resubmit(state: &AppState, principal: &Principal, submission_id: Uuid) -> AppResult<Submission> {
    let mut submission = state
        .repo
        .get_submission(submission_id)
        .await?
        .ok_or(AppError::NotFound("submission"))?;
    if submission.student_id != principal.id {
        return Err(AppError::forbidden("only the submitting student can update a submission"));
    }
    let (course, task) = load(state, submission.course_id, submission.task_id).await?;
    let due = due_date(&task, submission.course_id)?;
    authorize(principal, Action::Submit, Some(&course))?;

    let now = state.clock.now();
    submission.status = derive_status(now, due);
    submission.submitted_at = now;
    submission.grade = None;
    state.repo.update_submission(&submission).await?;
    info!(submission_id = %submission.id, status = submission.status.as_str(), "submission updated");
    Ok(submission)
}

pub async fn grade(
    state: &AppState,
    principal: &Principal,
    submission_id: Uuid,
    req: GradeReq,
) -> AppResult<Submission> {
    let mut submission = state
        .repo
        .get_submission(submission_id)
        .await?
        .ok_or(AppError::NotFound("submission"))?;
    let (course, task) = load(state, submission.course_id, submission.task_id).await?;
    authorize(principal, Action::ManageCourse, Some(&course))?;

    if !req.grade.is_finite() || req.grade < 0.0 || req.grade > f64::from(task.score) {
        return Err(AppError::Validation(format!(
            "grade must be between 0 and {}",
            task.score
        )));
    }
    submission.grade = Some(req.grade);
    state.repo.update_submission(&submission).await?;
    info!(submission_id = %submission.id, grade = req.grade, "submission graded");
    Ok(submission)
}

/// Submissions for one course assignment plus the enrolled students that
/// have not handed anything in.
pub async fn roster(
    state: &AppState,
    principal: &Principal,
    course_id: Uuid,
    task_id: Uuid,
) -> AppResult<SubmissionRoster> {
    let (course, task) = load(state, course_id, task_id).await?;
    let due = due_date(&task, course_id)?;
    authorize(principal, Action::ManageCourse, Some(&course))?;

    let submissions = state.repo.list_submissions(task_id, course_id).await?;
    let not_submitted = course
        .students
        .iter()
        .copied()
        .filter(|s| !submissions.iter().any(|sub| sub.student_id == *s))
        .collect();
    Ok(SubmissionRoster {
        task_id,
        course_id,
        due_date: due,
        submissions,
        not_submitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn status_follows_due_date() {
        let due = Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 0).unwrap();
        assert_eq!(derive_status(due - Duration::hours(1), due), SubmissionStatus::Submitted);
        assert_eq!(derive_status(due, due), SubmissionStatus::Submitted);
        assert_eq!(derive_status(due + Duration::seconds(1), due), SubmissionStatus::Late);
    }
}
