use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, Pool, Postgres};
use uuid::Uuid;

use super::Repository;
use crate::{
    error::{AppError, AppResult},
    models::{BuildState, Course, CourseTask, Folder, Material, Principal, Submission, Task, User},
};

pub type Db = Pool<Postgres>;

pub struct PgRepository {
    pool: Db,
}

impl PgRepository {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        // crate-relative path for sqlx migrations
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn hydrate_tasks(&self, rows: Vec<TaskRow>) -> AppResult<Vec<Task>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let assignments = sqlx::query_as::<_, CourseTaskRow>(
            "SELECT task_id, course_id, due_date, assigned_at FROM course_tasks
             WHERE task_id = ANY($1) ORDER BY assigned_at",
        )
        .bind(&ids[..])
        .fetch_all(&self.pool)
        .await?;
        let mut by_task: HashMap<Uuid, Vec<CourseTask>> = HashMap::new();
        for a in assignments {
            by_task.entry(a.task_id).or_default().push(CourseTask {
                course_id: a.course_id,
                due_date: a.due_date,
                assigned_at: a.assigned_at,
            });
        }
        Ok(rows
            .into_iter()
            .map(|r| {
                let course_tasks = by_task.remove(&r.id).unwrap_or_default();
                r.into_task(course_tasks)
            })
            .collect())
    }

    async fn hydrate_courses(&self, rows: Vec<CourseRow>) -> AppResult<Vec<Course>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let enrolled: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT course_id, student_id FROM course_students WHERE course_id = ANY($1)",
        )
        .bind(&ids[..])
        .fetch_all(&self.pool)
        .await?;
        let mut by_course: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (course_id, student_id) in enrolled {
            by_course.entry(course_id).or_default().push(student_id);
        }
        Ok(rows
            .into_iter()
            .map(|r| Course {
                students: by_course.remove(&r.id).unwrap_or_default(),
                id: r.id,
                name: r.name,
                description: r.description,
                code: r.code,
                teacher_id: r.teacher_id,
                created_at: r.created_at,
            })
            .collect())
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    score: i32,
    build_directory: Option<String>,
    loader: Option<String>,
    framework: Option<String>,
    data: Option<String>,
    wasm: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self, course_tasks: Vec<CourseTask>) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            score: self.score,
            course_tasks,
            build: BuildState {
                build_directory: self.build_directory,
                loader: self.loader,
                framework: self.framework,
                data: self.data,
                wasm: self.wasm,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const TASK_COLUMNS: &str = "id, title, description, score, build_directory, loader, framework, data, wasm, created_at, updated_at";

#[derive(FromRow)]
struct CourseTaskRow {
    task_id: Uuid,
    course_id: Uuid,
    due_date: DateTime<Utc>,
    assigned_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CourseRow {
    id: Uuid,
    name: String,
    description: String,
    code: String,
    teacher_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    role: String,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            name: r.name,
            role: r.role.parse().map_err(AppError::Storage)?,
        })
    }
}

#[derive(FromRow)]
struct SubmissionRow {
    id: Uuid,
    student_id: Uuid,
    task_id: Uuid,
    course_id: Uuid,
    grade: Option<f64>,
    status: String,
    submitted_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = AppError;

    fn try_from(r: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(Submission {
            id: r.id,
            student_id: r.student_id,
            task_id: r.task_id,
            course_id: r.course_id,
            grade: r.grade,
            status: r.status.parse().map_err(AppError::Storage)?,
            submitted_at: r.submitted_at,
        })
    }
}

#[derive(FromRow)]
struct FolderRow {
    id: Uuid,
    course_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<FolderRow> for Folder {
    fn from(r: FolderRow) -> Self {
        Folder {
            id: r.id,
            course_id: r.course_id,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct MaterialRow {
    id: Uuid,
    folder_id: Uuid,
    course_id: Uuid,
    title: String,
    original_name: String,
    stored_path: String,
    content_type: String,
    size_bytes: i64,
    uploaded_at: DateTime<Utc>,
}

impl From<MaterialRow> for Material {
    fn from(r: MaterialRow) -> Self {
        Material {
            id: r.id,
            folder_id: r.folder_id,
            course_id: r.course_id,
            title: r.title,
            original_name: r.original_name,
            stored_path: r.stored_path,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            uploaded_at: r.uploaded_at,
        }
    }
}

const MATERIAL_COLUMNS: &str =
    "id, folder_id, course_id, title, original_name, stored_path, content_type, size_bytes, uploaded_at";

fn unique_violation(e: sqlx::Error, msg: &str) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return AppError::conflict(msg);
        }
    }
    AppError::Database(e)
}

#[async_trait]
impl Repository for PgRepository {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, role) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_session(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (token) DO UPDATE SET user_id = EXCLUDED.user_id, expires_at = EXCLUDED.expires_at",
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn principal_for_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Principal>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.name, u.role FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = $1 AND (s.expires_at IS NULL OR s.expires_at > $2)",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        let user = row.map(User::try_from).transpose()?;
        Ok(user.map(|u| Principal {
            id: u.id,
            role: u.role,
        }))
    }

    async fn insert_task(&self, task: &Task) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO tasks (id, title, description, score, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.score)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> AppResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(self.hydrate_tasks(vec![r]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self) -> AppResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_tasks(rows).await
    }

    async fn update_task(&self, task: &Task) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET title = $2, description = $3, score = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.score)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_build_state(
        &self,
        id: Uuid,
        build: &BuildState,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Task>> {
        let done = sqlx::query(
            "UPDATE tasks SET build_directory = $2, loader = $3, framework = $4, data = $5, wasm = $6,
             updated_at = $7 WHERE id = $1",
        )
        .bind(id)
        .bind(&build.build_directory)
        .bind(&build.loader)
        .bind(&build.framework)
        .bind(&build.data)
        .bind(&build.wasm)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_task(id).await
    }

    async fn delete_task(&self, id: Uuid) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM submissions WHERE task_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM course_tasks WHERE task_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_assignment(&self, task_id: Uuid, assignment: &CourseTask) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO course_tasks (task_id, course_id, due_date, assigned_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(task_id)
        .bind(assignment.course_id)
        .bind(assignment.due_date)
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "task is already assigned to this course"))?;
        Ok(())
    }

    async fn update_due_date(
        &self,
        task_id: Uuid,
        course_id: Uuid,
        due_date: DateTime<Utc>,
    ) -> AppResult<bool> {
        let done = sqlx::query(
            "UPDATE course_tasks SET due_date = $3 WHERE task_id = $1 AND course_id = $2",
        )
        .bind(task_id)
        .bind(course_id)
        .bind(due_date)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_assignment(&self, task_id: Uuid, course_id: Uuid) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM submissions WHERE task_id = $1 AND course_id = $2")
            .bind(task_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM course_tasks WHERE task_id = $1 AND course_id = $2")
            .bind(task_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_course_tasks(&self, course_id: Uuid) -> AppResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT t.id, t.title, t.description, t.score, t.build_directory, t.loader, t.framework,
                    t.data, t.wasm, t.created_at, t.updated_at
             FROM tasks t JOIN course_tasks ct ON ct.task_id = t.id
             WHERE ct.course_id = $1 ORDER BY ct.assigned_at",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_tasks(rows).await
    }

    async fn insert_course(&self, course: &Course) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO courses (id, name, description, code, teacher_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(course.id)
        .bind(&course.name)
        .bind(&course.description)
        .bind(&course.code)
        .bind(course.teacher_id)
        .bind(course.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "course code already in use"))?;
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> AppResult<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, name, description, code, teacher_id, created_at FROM courses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(self.hydrate_courses(vec![r]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_course_by_code(&self, code: &str) -> AppResult<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, name, description, code, teacher_id, created_at FROM courses WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(self.hydrate_courses(vec![r]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_courses(&self) -> AppResult<Vec<Course>> {
        let rows = sqlx::query_as::<_, CourseRow>(
            "SELECT id, name, description, code, teacher_id, created_at FROM courses ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_courses(rows).await
    }

    async fn update_course(&self, course: &Course) -> AppResult<()> {
        sqlx::query("UPDATE courses SET name = $2, description = $3 WHERE id = $1")
            .bind(course.id)
            .bind(&course.name)
            .bind(&course.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_course(&self, id: Uuid) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        for stmt in [
            "DELETE FROM submissions WHERE course_id = $1",
            "DELETE FROM course_tasks WHERE course_id = $1",
            "DELETE FROM materials WHERE course_id = $1",
            "DELETE FROM folders WHERE course_id = $1",
            "DELETE FROM course_students WHERE course_id = $1",
        ] {
            sqlx::query(stmt).bind(id).execute(&mut *tx).await?;
        }
        let done = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }

    async fn add_student(&self, course_id: Uuid, student_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO course_students (course_id, student_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(course_id)
        .bind(student_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_student(&self, course_id: Uuid, student_id: Uuid) -> AppResult<bool> {
        let done = sqlx::query("DELETE FROM course_students WHERE course_id = $1 AND student_id = $2")
            .bind(course_id)
            .bind(student_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_folder(&self, folder: &Folder) -> AppResult<()> {
        sqlx::query("INSERT INTO folders (id, course_id, name, created_at) VALUES ($1, $2, $3, $4)")
            .bind(folder.id)
            .bind(folder.course_id)
            .bind(&folder.name)
            .bind(folder.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_folder(&self, id: Uuid) -> AppResult<Option<Folder>> {
        let row = sqlx::query_as::<_, FolderRow>(
            "SELECT id, course_id, name, created_at FROM folders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Folder::from))
    }

    async fn list_folders(&self, course_id: Uuid) -> AppResult<Vec<Folder>> {
        let rows = sqlx::query_as::<_, FolderRow>(
            "SELECT id, course_id, name, created_at FROM folders WHERE course_id = $1 ORDER BY created_at",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Folder::from).collect())
    }

    async fn rename_folder(&self, id: Uuid, name: &str) -> AppResult<bool> {
        let done = sqlx::query("UPDATE folders SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_folder(&self, id: Uuid) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM materials WHERE folder_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM folders WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_material(&self, m: &Material) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO materials ({MATERIAL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(m.id)
        .bind(m.folder_id)
        .bind(m.course_id)
        .bind(&m.title)
        .bind(&m.original_name)
        .bind(&m.stored_path)
        .bind(&m.content_type)
        .bind(m.size_bytes)
        .bind(m.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_material(&self, id: Uuid) -> AppResult<Option<Material>> {
        let row = sqlx::query_as::<_, MaterialRow>(&format!(
            "SELECT {MATERIAL_COLUMNS} FROM materials WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Material::from))
    }

    async fn list_materials(&self, folder_id: Uuid) -> AppResult<Vec<Material>> {
        let rows = sqlx::query_as::<_, MaterialRow>(&format!(
            "SELECT {MATERIAL_COLUMNS} FROM materials WHERE folder_id = $1 ORDER BY uploaded_at"
        ))
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Material::from).collect())
    }

    async fn delete_material(&self, id: Uuid) -> AppResult<bool> {
        let done = sqlx::query("DELETE FROM materials WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_submission(&self, s: &Submission) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO submissions (id, student_id, task_id, course_id, grade, status, submitted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(s.id)
        .bind(s.student_id)
        .bind(s.task_id)
        .bind(s.course_id)
        .bind(s.grade)
        .bind(s.status.as_str())
        .bind(s.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "task already submitted; update the submission instead"))?;
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> AppResult<Option<Submission>> {
        sqlx::query_as::<_, SubmissionRow>(
            "SELECT id, student_id, task_id, course_id, grade, status, submitted_at
             FROM submissions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Submission::try_from)
        .transpose()
    }

    async fn find_submission(
        &self,
        student_id: Uuid,
        task_id: Uuid,
    ) -> AppResult<Option<Submission>> {
        sqlx::query_as::<_, SubmissionRow>(
            "SELECT id, student_id, task_id, course_id, grade, status, submitted_at
             FROM submissions WHERE student_id = $1 AND task_id = $2",
        )
        .bind(student_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Submission::try_from)
        .transpose()
    }

    async fn update_submission(&self, s: &Submission) -> AppResult<()> {
        sqlx::query(
            "UPDATE submissions SET grade = $2, status = $3, submitted_at = $4 WHERE id = $1",
        )
        .bind(s.id)
        .bind(s.grade)
        .bind(s.status.as_str())
        .bind(s.submitted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_submissions(&self, task_id: Uuid, course_id: Uuid) -> AppResult<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            "SELECT id, student_id, task_id, course_id, grade, status, submitted_at
             FROM submissions WHERE task_id = $1 AND course_id = $2 ORDER BY submitted_at",
        )
        .bind(task_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Submission::try_from).collect()
    }
}
