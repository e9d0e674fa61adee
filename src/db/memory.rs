use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Repository;
use crate::{
    error::{AppError, AppResult},
    models::{BuildState, Course, CourseTask, Folder, Material, Principal, Submission, Task, User},
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, (Uuid, Option<DateTime<Utc>>)>,
    tasks: HashMap<Uuid, Task>,
    courses: HashMap<Uuid, Course>,
    folders: HashMap<Uuid, Folder>,
    materials: HashMap<Uuid, Material>,
    submissions: HashMap<Uuid, Submission>,
}

/// Process-local repository for tests and database-less development runs.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by<T, K: Ord>(mut v: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    v.sort_by_key(key);
    v
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        self.tables.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_session(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        self.tables
            .lock()
            .await
            .sessions
            .insert(token.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn principal_for_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Principal>> {
        let t = self.tables.lock().await;
        let Some((user_id, expires_at)) = t.sessions.get(token) else {
            return Ok(None);
        };
        if expires_at.is_some_and(|at| at <= now) {
            return Ok(None);
        }
        Ok(t.users.get(user_id).map(|u| Principal {
            id: u.id,
            role: u.role,
        }))
    }

    async fn insert_task(&self, task: &Task) -> AppResult<()> {
        self.tables.lock().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> AppResult<Option<Task>> {
        Ok(self.tables.lock().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self) -> AppResult<Vec<Task>> {
        let t = self.tables.lock().await;
        Ok(sorted_by(t.tasks.values().cloned().collect(), |x| x.created_at))
    }

    async fn update_task(&self, task: &Task) -> AppResult<()> {
        if let Some(stored) = self.tables.lock().await.tasks.get_mut(&task.id) {
            stored.title = task.title.clone();
            stored.description = task.description.clone();
            stored.score = task.score;
            stored.updated_at = task.updated_at;
        }
        Ok(())
    }

    async fn set_build_state(
        &self,
        id: Uuid,
        build: &BuildState,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Task>> {
        let mut t = self.tables.lock().await;
        Ok(t.tasks.get_mut(&id).map(|task| {
            task.build = build.clone();
            task.updated_at = at;
            task.clone()
        }))
    }

    async fn delete_task(&self, id: Uuid) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        t.submissions.retain(|_, s| s.task_id != id);
        Ok(t.tasks.remove(&id).is_some())
    }

    async fn insert_assignment(&self, task_id: Uuid, assignment: &CourseTask) -> AppResult<()> {
        let mut t = self.tables.lock().await;
        let task = t.tasks.get_mut(&task_id).ok_or(AppError::NotFound("task"))?;
        if task.assignment(assignment.course_id).is_some() {
            return Err(AppError::conflict("task is already assigned to this course"));
        }
        task.course_tasks.push(assignment.clone());
        Ok(())
    }

    async fn update_due_date(
        &self,
        task_id: Uuid,
        course_id: Uuid,
        due_date: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        let Some(task) = t.tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        match task.course_tasks.iter_mut().find(|ct| ct.course_id == course_id) {
            Some(ct) => {
                ct.due_date = due_date;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_assignment(&self, task_id: Uuid, course_id: Uuid) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        let Some(task) = t.tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        let before = task.course_tasks.len();
        task.course_tasks.retain(|ct| ct.course_id != course_id);
        let removed = task.course_tasks.len() != before;
        if removed {
            t.submissions
                .retain(|_, s| !(s.task_id == task_id && s.course_id == course_id));
        }
        Ok(removed)
    }

    async fn list_course_tasks(&self, course_id: Uuid) -> AppResult<Vec<Task>> {
        let t = self.tables.lock().await;
        let tasks = t
            .tasks
            .values()
            .filter(|task| task.assignment(course_id).is_some())
            .cloned()
            .collect();
        Ok(sorted_by(tasks, |task| {
            task.assignment(course_id).map(|ct| ct.assigned_at)
        }))
    }

    async fn insert_course(&self, course: &Course) -> AppResult<()> {
        let mut t = self.tables.lock().await;
        if t.courses.values().any(|c| c.code == course.code) {
            return Err(AppError::conflict("course code already in use"));
        }
        t.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> AppResult<Option<Course>> {
        Ok(self.tables.lock().await.courses.get(&id).cloned())
    }

    async fn find_course_by_code(&self, code: &str) -> AppResult<Option<Course>> {
        let t = self.tables.lock().await;
        Ok(t.courses.values().find(|c| c.code == code).cloned())
    }

    async fn list_courses(&self) -> AppResult<Vec<Course>> {
        let t = self.tables.lock().await;
        Ok(sorted_by(t.courses.values().cloned().collect(), |c| c.created_at))
    }

    async fn update_course(&self, course: &Course) -> AppResult<()> {
        if let Some(stored) = self.tables.lock().await.courses.get_mut(&course.id) {
            stored.name = course.name.clone();
            stored.description = course.description.clone();
        }
        Ok(())
    }

    async fn delete_course(&self, id: Uuid) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        t.submissions.retain(|_, s| s.course_id != id);
        for task in t.tasks.values_mut() {
            task.course_tasks.retain(|ct| ct.course_id != id);
        }
        t.materials.retain(|_, m| m.course_id != id);
        t.folders.retain(|_, f| f.course_id != id);
        Ok(t.courses.remove(&id).is_some())
    }

    async fn add_student(&self, course_id: Uuid, student_id: Uuid) -> AppResult<()> {
        let mut t = self.tables.lock().await;
        let course = t.courses.get_mut(&course_id).ok_or(AppError::NotFound("course"))?;
        if !course.students.contains(&student_id) {
            course.students.push(student_id);
        }
        Ok(())
    }

    async fn remove_student(&self, course_id: Uuid, student_id: Uuid) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        let Some(course) = t.courses.get_mut(&course_id) else {
            return Ok(false);
        };
        let before = course.students.len();
        course.students.retain(|s| *s != student_id);
        Ok(course.students.len() != before)
    }

    async fn insert_folder(&self, folder: &Folder) -> AppResult<()> {
        self.tables.lock().await.folders.insert(folder.id, folder.clone());
        Ok(())
    }

    async fn get_folder(&self, id: Uuid) -> AppResult<Option<Folder>> {
        Ok(self.tables.lock().await.folders.get(&id).cloned())
    }

    async fn list_folders(&self, course_id: Uuid) -> AppResult<Vec<Folder>> {
        let t = self.tables.lock().await;
        let folders = t
            .folders
            .values()
            .filter(|f| f.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_by(folders, |f| f.created_at))
    }

    async fn rename_folder(&self, id: Uuid, name: &str) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        Ok(t.folders
            .get_mut(&id)
            .map(|f| f.name = name.to_string())
            .is_some())
    }

    async fn delete_folder(&self, id: Uuid) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        t.materials.retain(|_, m| m.folder_id != id);
        Ok(t.folders.remove(&id).is_some())
    }

    async fn insert_material(&self, material: &Material) -> AppResult<()> {
        self.tables
            .lock()
            .await
            .materials
            .insert(material.id, material.clone());
        Ok(())
    }

    async fn get_material(&self, id: Uuid) -> AppResult<Option<Material>> {
        Ok(self.tables.lock().await.materials.get(&id).cloned())
    }

    async fn list_materials(&self, folder_id: Uuid) -> AppResult<Vec<Material>> {
        let t = self.tables.lock().await;
        let materials = t
            .materials
            .values()
            .filter(|m| m.folder_id == folder_id)
            .cloned()
            .collect();
        Ok(sorted_by(materials, |m| m.uploaded_at))
    }

    async fn delete_material(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.tables.lock().await.materials.remove(&id).is_some())
    }

    async fn insert_submission(&self, submission: &Submission) -> AppResult<()> {
        let mut t = self.tables.lock().await;
        if t.submissions
            .values()
            .any(|s| s.student_id == submission.student_id && s.task_id == submission.task_id)
        {
            return Err(AppError::conflict("task already submitted; update the submission instead"));
        }
        t.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get_submission(&self, id: Uuid) -> AppResult<Option<Submission>> {
        Ok(self.tables.lock().await.submissions.get(&id).cloned())
    }

    async fn find_submission(
        &self,
        student_id: Uuid,
        task_id: Uuid,
    ) -> AppResult<Option<Submission>> {
        let t = self.tables.lock().await;
        Ok(t.submissions
            .values()
            .find(|s| s.student_id == student_id && s.task_id == task_id)
            .cloned())
    }

    async fn update_submission(&self, submission: &Submission) -> AppResult<()> {
        if let Some(stored) = self.tables.lock().await.submissions.get_mut(&submission.id) {
            stored.grade = submission.grade;
            stored.status = submission.status;
            stored.submitted_at = submission.submitted_at;
        }
        Ok(())
    }

    async fn list_submissions(&self, task_id: Uuid, course_id: Uuid) -> AppResult<Vec<Submission>> {
        let t = self.tables.lock().await;
        let subs = t
            .submissions
            .values()
            .filter(|s| s.task_id == task_id && s.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_by(subs, |s| s.submitted_at))
    }
}
