use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{BuildState, Course, CourseTask, Folder, Material, Principal, Submission, Task, User},
};

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// Persistence seam for the service. Uniqueness rules (course code,
/// task/course assignment, student/task submission) are enforced here and
/// reported as `AppError::Conflict`.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_user(&self, user: &User) -> AppResult<()>;
    async fn insert_session(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;
    async fn principal_for_token(&self, token: &str, now: DateTime<Utc>)
        -> AppResult<Option<Principal>>;

    async fn insert_task(&self, task: &Task) -> AppResult<()>;
    async fn get_task(&self, id: Uuid) -> AppResult<Option<Task>>;
    async fn list_tasks(&self) -> AppResult<Vec<Task>>;
    /// Title, description, score and `updated_at`.
    async fn update_task(&self, task: &Task) -> AppResult<()>;
    async fn set_build_state(
        &self,
        id: Uuid,
        build: &BuildState,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Task>>;
    /// Removes the task together with its assignments and submissions.
    async fn delete_task(&self, id: Uuid) -> AppResult<bool>;

    async fn insert_assignment(&self, task_id: Uuid, assignment: &CourseTask) -> AppResult<()>;
    async fn update_due_date(
        &self,
        task_id: Uuid,
        course_id: Uuid,
        due_date: DateTime<Utc>,
    ) -> AppResult<bool>;
    /// Removes the assignment and the submissions made against it.
    async fn delete_assignment(&self, task_id: Uuid, course_id: Uuid) -> AppResult<bool>;
    async fn list_course_tasks(&self, course_id: Uuid) -> AppResult<Vec<Task>>;

    async fn insert_course(&self, course: &Course) -> AppResult<()>;
    async fn get_course(&self, id: Uuid) -> AppResult<Option<Course>>;
    async fn find_course_by_code(&self, code: &str) -> AppResult<Option<Course>>;
    async fn list_courses(&self) -> AppResult<Vec<Course>>;
    /// Name and description.
    async fn update_course(&self, course: &Course) -> AppResult<()>;
    /// Removes the course and every row that hangs off it.
    async fn delete_course(&self, id: Uuid) -> AppResult<bool>;
    async fn add_student(&self, course_id: Uuid, student_id: Uuid) -> AppResult<()>;
    async fn remove_student(&self, course_id: Uuid, student_id: Uuid) -> AppResult<bool>;

    async fn insert_folder(&self, folder: &Folder) -> AppResult<()>;
    async fn get_folder(&self, id: Uuid) -> AppResult<Option<Folder>>;
    async fn list_folders(&self, course_id: Uuid) -> AppResult<Vec<Folder>>;
    async fn rename_folder(&self, id: Uuid, name: &str) -> AppResult<bool>;
    /// Removes the folder and its material rows.
    async fn delete_folder(&self, id: Uuid) -> AppResult<bool>;

    async fn insert_material(&self, material: &Material) -> AppResult<()>;
    async fn get_material(&self, id: Uuid) -> AppResult<Option<Material>>;
    async fn list_materials(&self, folder_id: Uuid) -> AppResult<Vec<Material>>;
    async fn delete_material(&self, id: Uuid) -> AppResult<bool>;

    async fn insert_submission(&self, submission: &Submission) -> AppResult<()>;
    async fn get_submission(&self, id: Uuid) -> AppResult<Option<Submission>>;
    async fn find_submission(&self, student_id: Uuid, task_id: Uuid)
        -> AppResult<Option<Submission>>;
    /// Grade, status and `submitted_at`.
    async fn update_submission(&self, submission: &Submission) -> AppResult<()>;
    async fn list_submissions(&self, task_id: Uuid, course_id: Uuid) -> AppResult<Vec<Submission>>;
}
