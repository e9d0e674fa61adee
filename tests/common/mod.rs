#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;
use webgl_classroom::{
    clock::Clock,
    config::Config,
    db::{MemoryRepository, Repository},
    models::{Role, User},
    router, AppState,
};

const BOUNDARY: &str = "classroom-test-boundary";

pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().expect("clock lock") = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("clock lock")
    }
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("timestamp")
        .with_timezone(&Utc)
}

pub struct Account {
    pub id: Uuid,
    pub token: String,
}

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    pub admin: Account,
    pub teacher: Account,
    pub student: Account,
    pub outsider: Account,
    _data: TempDir,
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        body: &'a [u8],
    },
}

pub fn file<'a>(file_name: &'a str, content_type: &'a str, body: &'a [u8]) -> Part<'a> {
    Part::File {
        name: "file",
        file_name,
        content_type,
        body,
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                );
            }
            Part::File {
                name,
                file_name,
                content_type,
                body,
            } => {
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(body);
                out.extend_from_slice(b"\r\n");
            }
        }
    }
    out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    out
}

pub fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in entries {
        w.start_file(*name, zip::write::FileOptions::default())
            .expect("zip entry");
        w.write_all(body).expect("zip write");
    }
    w.finish().expect("zip finish").into_inner()
}

/// Relative paths of every file below `dir`, sorted.
pub fn files_under(dir: &Path) -> Vec<String> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

async fn account(repo: &MemoryRepository, name: &str, role: Role) -> Account {
    let user = User {
        id: Uuid::new_v4(),
        name: name.into(),
        role,
    };
    repo.insert_user(&user).await.expect("insert user");
    let token = format!("{name}-token");
    repo.insert_session(&token, user.id, None)
        .await
        .expect("insert session");
    Account { id: user.id, token }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tune: impl FnOnce(&mut Config)) -> Self {
        let data = tempfile::tempdir().expect("tempdir");
        let repo = MemoryRepository::new();
        let admin = account(&repo, "admin", Role::Admin).await;
        let teacher = account(&repo, "teacher", Role::Teacher).await;
        let student = account(&repo, "student", Role::Student).await;
        let outsider = account(&repo, "outsider", Role::Student).await;

        let clock = Arc::new(FixedClock(Mutex::new(at("2025-05-01T12:00:00Z"))));
        let mut config = Config::with_data_dir(data.path());
        tune(&mut config);
        let state = AppState::new(
            config,
            Arc::new(repo),
            clock.clone(),
        );
        state.artifacts.ensure_layout().await.expect("layout");
        Self {
            app: router(state.clone()),
            state,
            clock,
            admin,
            teacher,
            student,
            outsider,
            _data: data,
        }
    }

    pub fn builds_root(&self) -> PathBuf {
        self.state.artifacts.builds_root()
    }

    pub fn build_dir(&self, task_id: Uuid) -> PathBuf {
        self.state.artifacts.build_dir(task_id)
    }

    pub async fn raw(&self, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let res = self.app.clone().oneshot(req).await.expect("router");
        let status = res.status();
        let headers = res.headers().clone();
        let body = to_bytes(res.into_body(), usize::MAX).await.expect("body");
        (status, headers, body.to_vec())
    }

    pub async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(v) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string())),
            None => req.body(Body::empty()),
        }
        .expect("request");
        let (status, _, bytes) = self.raw(req).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    pub async fn multipart(&self, method: Method, uri: &str, token: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(multipart_body(parts)))
            .expect("request");
        let (status, _, bytes) = self.raw(req).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get_public(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).expect("request");
        self.raw(req).await
    }

    // ---- fixtures ----

    pub async fn create_task(&self, title: &str) -> Uuid {
        let (status, task) = self
            .json(
                Method::POST,
                "/api/tasks",
                Some(&self.admin.token),
                Some(serde_json::json!({ "title": title, "description": "lab", "score": 100 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{task}");
        id_of(&task)
    }

    /// A course owned by the teacher with the student enrolled.
    pub async fn create_course(&self, name: &str) -> (Uuid, String) {
        let (status, course) = self
            .json(
                Method::POST,
                "/api/courses",
                Some(&self.teacher.token),
                Some(serde_json::json!({ "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{course}");
        let code = course["code"].as_str().expect("code").to_string();
        let (status, joined) = self
            .json(
                Method::POST,
                "/api/enrollments",
                Some(&self.student.token),
                Some(serde_json::json!({ "code": code })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{joined}");
        (id_of(&course), code)
    }

    pub async fn assign(&self, course_id: Uuid, task_id: Uuid, due: &str) -> (StatusCode, Value) {
        self.json(
            Method::POST,
            &format!("/api/courses/{course_id}/tasks"),
            Some(&self.teacher.token),
            Some(serde_json::json!({ "task_id": task_id, "due_date": due })),
        )
        .await
    }

    pub async fn upload_batch(&self, task_id: Uuid, parts: &[Part<'_>]) -> (StatusCode, Value) {
        self.multipart(
            Method::POST,
            &format!("/api/tasks/{task_id}/build"),
            &self.admin.token,
            parts,
        )
        .await
    }
}

pub fn id_of(v: &Value) -> Uuid {
    v["id"].as_str().and_then(|s| s.parse().ok()).expect("id")
}
