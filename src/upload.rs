//! Acceptance rules for inbound files, checked before anything is written,
//! and the streaming receiver that enforces the size ceilings.

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use axum::extract::{multipart::Field, Multipart};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::{
    artifacts::{remove_file_logged, ArtifactStore},
    build::{canonical_file_name, classify, FileRole},
    error::{AppError, AppResult},
    models::BuildRole,
};

const MIB: u64 = 1024 * 1024;

/// Slack on top of the file ceilings for multipart framing and text fields.
const BODY_OVERHEAD: u64 = MIB;

const MATERIAL_TYPES: &[(&str, &[&str])] = &[
    ("pdf", &["application/pdf"]),
    ("doc", &["application/msword"]),
    ("docx", &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"]),
    ("ppt", &["application/vnd.ms-powerpoint"]),
    ("pptx", &["application/vnd.openxmlformats-officedocument.presentationml.presentation"]),
    ("xls", &["application/vnd.ms-excel"]),
    ("xlsx", &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"]),
    ("txt", &["text/plain"]),
    ("png", &["image/png"]),
    ("jpg", &["image/jpeg"]),
    ("jpeg", &["image/jpeg"]),
    ("gif", &["image/gif"]),
];

const WEBGL_TYPES: &[(&str, &[&str])] = &[
    ("js", &["application/javascript", "text/javascript", "application/x-javascript"]),
    ("wasm", &["application/wasm"]),
    ("data", &["application/octet-stream"]),
    ("unityweb", &["application/octet-stream"]),
    ("json", &["application/json"]),
];

const WEBGL_KEYWORDS: &[&str] = &["loader", "data", "wasm", "framework"];

const ARCHIVE_TYPES: &[(&str, &[&str])] = &[(
    "zip",
    &["application/zip", "application/x-zip-compressed", "application/x-zip", "multipart/x-zip"],
)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadChannel {
    /// Course documents and images.
    Material,
    /// Up to four WebGL build files in one request.
    WebGl,
    /// A zipped WebGL build.
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl UploadChannel {
    pub fn limits(self) -> UploadLimits {
        match self {
            UploadChannel::Material => UploadLimits {
                max_file_bytes: 10 * MIB,
                max_files: 1,
            },
            UploadChannel::WebGl => UploadLimits {
                max_file_bytes: 200 * MIB,
                max_files: 4,
            },
            UploadChannel::Archive => UploadLimits {
                max_file_bytes: 500 * MIB,
                max_files: 1,
            },
        }
    }

    /// Request body ceiling for routes on this channel.
    pub fn body_limit(self) -> usize {
        let l = self.limits();
        (l.max_file_bytes * l.max_files as u64 + BODY_OVERHEAD) as usize
    }

    fn name(self) -> &'static str {
        match self {
            UploadChannel::Material => "material",
            UploadChannel::WebGl => "webgl build",
            UploadChannel::Archive => "build archive",
        }
    }

    /// Extension/MIME screening. WebGL files are also let through when their
    /// name carries a build-role keyword.
    pub fn accepts(self, file_name: &str, content_type: &str) -> bool {
        let table = match self {
            UploadChannel::Material => MATERIAL_TYPES,
            UploadChannel::WebGl => WEBGL_TYPES,
            UploadChannel::Archive => ARCHIVE_TYPES,
        };
        if pair_allowed(table, file_name, content_type) {
            return true;
        }
        if self == UploadChannel::WebGl {
            let lower = file_name.to_ascii_lowercase();
            return WEBGL_KEYWORDS.iter().any(|k| lower.contains(k));
        }
        false
    }

    pub fn check(self, file_name: &str, content_type: &str) -> AppResult<()> {
        if file_name.trim().is_empty() {
            return Err(AppError::validation("uploaded file has no name"));
        }
        if self.accepts(file_name, content_type) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "{file_name:?} ({content_type}) is not an accepted {} file",
                self.name()
            )))
        }
    }
}

fn extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn pair_allowed(table: &[(&str, &[&str])], file_name: &str, content_type: &str) -> bool {
    let Some(ext) = extension(file_name) else {
        return false;
    };
    let mime = essence(content_type);
    table
        .iter()
        .any(|(e, mimes)| *e == ext && mimes.contains(&mime.as_str()))
}

/// Where and under which names a build upload for one task lands.
/// A pure function of the store layout and the task id.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub channel: UploadChannel,
    pub task_id: Uuid,
    pub destination: PathBuf,
    pub limits: UploadLimits,
}

pub fn build_upload_policy(store: &ArtifactStore, task_id: Uuid, channel: UploadChannel) -> UploadPolicy {
    UploadPolicy {
        channel,
        task_id,
        destination: store.build_dir(task_id),
        limits: channel.limits(),
    }
}

impl UploadPolicy {
    pub fn filter(&self, file_name: &str, content_type: &str) -> AppResult<()> {
        self.channel.check(file_name, content_type)
    }

    /// Canonical stored name for a declared WebGL file name.
    pub fn file_name_for(&self, declared: &str) -> AppResult<(BuildRole, &'static str)> {
        match classify(declared) {
            FileRole::Build(role) => Ok((role, canonical_file_name(role))),
            FileRole::Unrecognized => Err(AppError::Validation(format!(
                "cannot tell which build file {declared:?} is; expected loader, framework, data or wasm"
            ))),
        }
    }
}

/// Metadata of a multipart file part, read before its body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
}

impl FilePart {
    pub fn of(field: &Field<'_>) -> Option<Self> {
        let file_name = field.file_name()?.to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        Some(Self {
            file_name,
            content_type,
        })
    }
}

/// Streams a multipart field into `dest`, enforcing `max_bytes`. Nothing is
/// left at `dest` when this returns an error.
pub async fn receive_field(mut field: Field<'_>, dest: &Path, max_bytes: u64) -> AppResult<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut out = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;
    let result: AppResult<()> = async {
        while let Some(chunk) = field.chunk().await? {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(AppError::Validation(format!(
                    "file exceeds the {} MiB limit",
                    max_bytes / MIB
                )));
            }
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }
    .await;
    drop(out);
    match result {
        Ok(()) => Ok(written),
        Err(e) => {
            remove_file_logged(dest).await;
            Err(e)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub part: FilePart,
    pub path: PathBuf,
    pub size: u64,
}

/// Reads a request carrying exactly one file plus optional text fields.
/// The file is screened against `channel` before its body is read and
/// streamed to `dest`.
pub async fn receive_single(
    mp: &mut Multipart,
    channel: UploadChannel,
    dest: &Path,
) -> AppResult<(ReceivedFile, HashMap<String, String>)> {
    let mut fields = HashMap::new();
    let mut received: Option<ReceivedFile> = None;
    let outcome: AppResult<()> = async {
        while let Some(field) = mp.next_field().await? {
            let Some(part) = FilePart::of(&field) else {
                let name = field.name().unwrap_or_default().to_string();
                fields.insert(name, field.text().await?);
                continue;
            };
            if received.is_some() {
                return Err(AppError::validation("only one file may be uploaded here"));
            }
            channel.check(&part.file_name, &part.content_type)?;
            let size = receive_field(field, dest, channel.limits().max_file_bytes).await?;
            received = Some(ReceivedFile {
                part,
                path: dest.to_path_buf(),
                size,
            });
        }
        Ok(())
    }
    .await;
    if let Err(e) = outcome {
        if received.is_some() {
            remove_file_logged(dest).await;
        }
        return Err(e);
    }
    let file = received.ok_or_else(|| AppError::validation("file is required"))?;
    Ok((file, fields))
}

/// Reads a WebGL multi-file request into `dir` under canonical names. The
/// batch is screened as a unit: any rejected part fails the whole request,
/// and the caller discards `dir`.
pub async fn receive_batch(
    mp: &mut Multipart,
    policy: &UploadPolicy,
    dir: &Path,
) -> AppResult<Vec<BuildRole>> {
    let mut roles: Vec<BuildRole> = Vec::new();
    while let Some(field) = mp.next_field().await? {
        let Some(part) = FilePart::of(&field) else {
            continue;
        };
        if roles.len() >= policy.limits.max_files {
            return Err(AppError::Validation(format!(
                "at most {} build files per upload",
                policy.limits.max_files
            )));
        }
        policy.filter(&part.file_name, &part.content_type)?;
        let (role, name) = policy.file_name_for(&part.file_name)?;
        if roles.contains(&role) {
            return Err(AppError::Validation(format!(
                "more than one {role} file in the upload"
            )));
        }
        receive_field(field, &dir.join(name), policy.limits.max_file_bytes).await?;
        roles.push(role);
    }
    Ok(roles)
}

/// Runs an upload to completion or gives up after `limit`. Dropping the
/// future stops reading the body; the caller cleans up what was staged.
pub async fn within<T>(limit: Duration, upload: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    match tokio::time::timeout(limit, upload).await {
        Ok(result) => result,
        Err(_) => {
            warn!(secs = limit.as_secs(), "upload timed out");
            Err(AppError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_channel_requires_matching_pairs() {
        let c = UploadChannel::Material;
        assert!(c.accepts("notes.pdf", "application/pdf"));
        assert!(c.accepts("Photo.JPG", "image/jpeg"));
        assert!(c.accepts("readme.txt", "text/plain; charset=utf-8"));
        assert!(!c.accepts("notes.pdf", "image/png"));
        assert!(!c.accepts("script.exe", "application/octet-stream"));
        assert!(!c.accepts("noext", "application/pdf"));
    }

    #[test]
    fn webgl_channel_accepts_pairs_or_role_keywords() {
        let c = UploadChannel::WebGl;
        assert!(c.accepts("app.js", "text/javascript"));
        assert!(c.accepts("app.wasm", "application/wasm"));
        assert!(c.accepts("meta.json", "application/json"));
        assert!(c.accepts("Game.loader.bin", "application/x-whatever"));
        assert!(c.accepts("game.DATA.gz", "application/gzip"));
        assert!(!c.accepts("evil.exe", "application/x-msdownload"));
        assert!(!c.accepts("notes.pdf", "application/pdf"));
    }

    #[test]
    fn archive_channel_only_takes_zip() {
        let c = UploadChannel::Archive;
        assert!(c.accepts("build.zip", "application/zip"));
        assert!(c.accepts("build.ZIP", "application/x-zip-compressed"));
        assert!(!c.accepts("build.tar.gz", "application/gzip"));
        assert!(!c.accepts("build.zip", "text/plain"));
    }

    #[test]
    fn check_reports_a_readable_reason() {
        let err = UploadChannel::Archive
            .check("build.rar", "application/vnd.rar")
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("build archive"));
    }

    #[test]
    fn limits_per_channel() {
        assert_eq!(UploadChannel::Material.limits().max_file_bytes, 10 * MIB);
        assert_eq!(UploadChannel::WebGl.limits().max_file_bytes, 200 * MIB);
        assert_eq!(UploadChannel::WebGl.limits().max_files, 4);
        assert_eq!(UploadChannel::Archive.limits().max_file_bytes, 500 * MIB);
        assert!(UploadChannel::Archive.body_limit() > (500 * MIB) as usize);
    }

    #[test]
    fn policy_resolves_destination_and_names_from_task_id() {
        let store = ArtifactStore::new("/srv/data", "builds");
        let id = Uuid::new_v4();
        let policy = build_upload_policy(&store, id, UploadChannel::WebGl);
        assert_eq!(policy.destination, store.build_dir(id));
        assert_eq!(
            policy.file_name_for("MyGame.framework.js").unwrap(),
            (BuildRole::Framework, "Build.framework.js")
        );
        assert!(policy.file_name_for("index.html").is_err());
    }

    #[tokio::test]
    async fn slow_uploads_time_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = within(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout));
    }
}
