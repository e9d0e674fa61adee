use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

/// The authenticated caller of a request.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// One of the four artifacts a WebGL runtime loader consumes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BuildRole {
    Loader,
    Framework,
    Data,
    Wasm,
}

impl BuildRole {
    pub const ALL: [BuildRole; 4] = [
        BuildRole::Loader,
        BuildRole::Framework,
        BuildRole::Data,
        BuildRole::Wasm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildRole::Loader => "loader",
            BuildRole::Framework => "framework",
            BuildRole::Data => "data",
            BuildRole::Wasm => "wasm",
        }
    }
}

impl fmt::Display for BuildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loader" => Ok(BuildRole::Loader),
            "framework" => Ok(BuildRole::Framework),
            "data" => Ok(BuildRole::Data),
            "wasm" => Ok(BuildRole::Wasm),
            other => Err(format!("unknown build role {other:?}")),
        }
    }
}

/// Where a task's current build lives. Role paths are in served form
/// (`/<prefix>/<taskId>/...`); `build_directory` is the on-disk directory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildState {
    #[serde(skip_serializing, default)]
    pub build_directory: Option<String>,
    pub loader: Option<String>,
    pub framework: Option<String>,
    pub data: Option<String>,
    pub wasm: Option<String>,
}

impl BuildState {
    pub fn path(&self, role: BuildRole) -> Option<&str> {
        match role {
            BuildRole::Loader => self.loader.as_deref(),
            BuildRole::Framework => self.framework.as_deref(),
            BuildRole::Data => self.data.as_deref(),
            BuildRole::Wasm => self.wasm.as_deref(),
        }
    }

    pub fn set_path(&mut self, role: BuildRole, path: Option<String>) {
        let slot = match role {
            BuildRole::Loader => &mut self.loader,
            BuildRole::Framework => &mut self.framework,
            BuildRole::Data => &mut self.data,
            BuildRole::Wasm => &mut self.wasm,
        };
        *slot = path;
    }

    pub fn has_any_role(&self) -> bool {
        BuildRole::ALL.iter().any(|r| self.path(*r).is_some())
    }

    /// Loader and data recorded: the minimum a WebGL loader can boot.
    pub fn is_complete(&self) -> bool {
        self.loader.is_some() && self.data.is_some()
    }
}

/// Per-course scheduling of a task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CourseTask {
    pub course_id: Uuid,
    pub due_date: DateTime<Utc>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub score: i32,
    pub course_tasks: Vec<CourseTask>,
    pub build: BuildState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn assignment(&self, course_id: Uuid) -> Option<&CourseTask> {
        self.course_tasks.iter().find(|ct| ct.course_id == course_id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub code: String,
    pub teacher_id: Uuid,
    pub students: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Course {
    pub fn is_owner(&self, user: Uuid) -> bool {
        self.teacher_id == user
    }

    pub fn is_enrolled(&self, user: Uuid) -> bool {
        self.students.contains(&user)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Folder {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Material {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub original_name: String,
    /// Relative to the materials root.
    #[serde(skip_serializing)]
    pub stored_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    Late,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Late => "late",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "late" => Ok(SubmissionStatus::Late),
            other => Err(format!("unknown submission status {other:?}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub student_id: Uuid,
    pub task_id: Uuid,
    pub course_id: Uuid,
    pub grade: Option<f64>,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
}

// --- request payloads ---

#[derive(Deserialize, Debug, Clone)]
pub struct CreateTaskReq {
    pub title: String,
    pub description: Option<String>,
    pub score: Option<i32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct UpdateTaskReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub score: Option<i32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CreateCourseReq {
    pub name: String,
    pub description: Option<String>,
    pub code: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct UpdateCourseReq {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JoinCourseReq {
    pub code: String,
}

/// Dates arrive as RFC 3339 strings so malformed values become validation errors.
#[derive(Deserialize, Debug, Clone)]
pub struct AssignTaskReq {
    pub task_id: Uuid,
    pub due_date: String,
    pub assigned_at: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UpdateDueDateReq {
    pub due_date: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GradeReq {
    pub grade: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FolderReq {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_state_completeness_needs_loader_and_data() {
        let mut b = BuildState::default();
        assert!(!b.has_any_role());
        b.set_path(BuildRole::Loader, Some("/builds/t/Build.loader.js".into()));
        assert!(b.has_any_role());
        assert!(!b.is_complete());
        b.set_path(BuildRole::Data, Some("/builds/t/Build.data".into()));
        assert!(b.is_complete());
        assert_eq!(b.path(BuildRole::Wasm), None);
    }

    #[test]
    fn build_role_parses_case_insensitively() {
        assert_eq!("WASM".parse::<BuildRole>(), Ok(BuildRole::Wasm));
        assert!("index".parse::<BuildRole>().is_err());
    }

    #[test]
    fn build_directory_is_not_exposed() {
        let b = BuildState {
            build_directory: Some("/srv/data/builds/x".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&b).unwrap();
        assert!(json.get("build_directory").is_none());
        assert!(json.get("loader").unwrap().is_null());
    }
}
