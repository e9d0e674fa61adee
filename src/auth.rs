//! Who may do what. Callers resolve the resource first (so a missing one is
//! a 404) and then ask [`authorize`].

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::{
    error::{AppError, AppResult},
    models::{Course, Principal, Role},
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create, edit or delete a task, or upload its build.
    ManageTask,
    /// Browse the whole task catalogue.
    BrowseTasks,
    CreateCourse,
    /// Edit or delete a course, its folders and materials, its task
    /// assignments, and read or grade its submissions.
    ManageCourse,
    /// Read a course, its folders, materials and task list.
    ReadCourse,
    /// Hand in work for a task assigned to the course.
    Submit,
    /// Join a course by its code.
    Enroll,
}

impl Action {
    fn denial(self) -> &'static str {
        match self {
            Action::ManageTask => "only administrators can manage tasks",
            Action::BrowseTasks => "only teachers and administrators can browse all tasks",
            Action::CreateCourse => "only teachers and administrators can create courses",
            Action::ManageCourse => "only the course teacher or an administrator can do this",
            Action::ReadCourse => "you are not a member of this course",
            Action::Submit => "only students enrolled in this course can submit",
            Action::Enroll => "only students can join courses",
        }
    }
}

pub fn permits(p: &Principal, action: Action, course: Option<&Course>) -> bool {
    let owner = course.is_some_and(|c| c.is_owner(p.id));
    let enrolled = course.is_some_and(|c| p.role == Role::Student && c.is_enrolled(p.id));
    match action {
        Action::ManageTask => p.is_admin(),
        Action::BrowseTasks | Action::CreateCourse => matches!(p.role, Role::Admin | Role::Teacher),
        Action::ManageCourse => p.is_admin() || owner,
        Action::ReadCourse => p.is_admin() || owner || enrolled,
        Action::Submit => enrolled,
        Action::Enroll => p.role == Role::Student,
    }
}

pub fn authorize(p: &Principal, action: Action, course: Option<&Course>) -> AppResult<()> {
    if permits(p, action, course) {
        Ok(())
    } else {
        tracing::debug!(user = %p.id, role = p.role.as_str(), ?action, "denied");
        Err(AppError::forbidden(action.denial()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthenticated)?;
        state
            .repo
            .principal_for_token(bearer.token(), state.clock.now())
            .await?
            .ok_or(AppError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn principal(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            role,
        }
    }

    fn course(teacher: &Principal, students: &[&Principal]) -> Course {
        Course {
            id: Uuid::new_v4(),
            name: "CS101".into(),
            description: String::new(),
            code: "ABC123".into(),
            teacher_id: teacher.id,
            students: students.iter().map(|s| s.id).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_admins_manage_tasks() {
        assert!(permits(&principal(Role::Admin), Action::ManageTask, None));
        assert!(!permits(&principal(Role::Teacher), Action::ManageTask, None));
        assert!(!permits(&principal(Role::Student), Action::ManageTask, None));
    }

    #[test]
    fn course_management_is_owner_or_admin() {
        let owner = principal(Role::Teacher);
        let other = principal(Role::Teacher);
        let c = course(&owner, &[]);
        assert!(permits(&owner, Action::ManageCourse, Some(&c)));
        assert!(!permits(&other, Action::ManageCourse, Some(&c)));
        assert!(permits(&principal(Role::Admin), Action::ManageCourse, Some(&c)));
    }

    #[test]
    fn students_never_manage_even_when_enrolled() {
        let owner = principal(Role::Teacher);
        let student = principal(Role::Student);
        let outsider = principal(Role::Student);
        let c = course(&owner, &[&student]);
        assert!(!permits(&student, Action::ManageCourse, Some(&c)));
        assert!(!permits(&outsider, Action::ManageCourse, Some(&c)));
        let err = authorize(&outsider, Action::ManageCourse, Some(&c)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn reading_needs_membership() {
        let owner = principal(Role::Teacher);
        let student = principal(Role::Student);
        let outsider = principal(Role::Student);
        let c = course(&owner, &[&student]);
        assert!(permits(&student, Action::ReadCourse, Some(&c)));
        assert!(permits(&owner, Action::ReadCourse, Some(&c)));
        assert!(!permits(&outsider, Action::ReadCourse, Some(&c)));
        assert!(!permits(&principal(Role::Teacher), Action::ReadCourse, Some(&c)));
    }

    #[test]
    fn submitting_needs_an_enrolled_student() {
        let owner = principal(Role::Teacher);
        let student = principal(Role::Student);
        let c = course(&owner, &[&student]);
        assert!(permits(&student, Action::Submit, Some(&c)));
        assert!(!permits(&owner, Action::Submit, Some(&c)));
        assert!(!permits(&principal(Role::Admin), Action::Submit, Some(&c)));
        assert!(!permits(&principal(Role::Student), Action::Submit, Some(&c)));
    }
}
