//! Turns accepted uploads into a task's one coherent WebGL build.
//!
//! Batch and archive builds are assembled in a staging directory and then
//! swapped in whole under the task's lock, so readers see either the old or
//! the new build and never a mix. Single-slot uploads rename one file over
//! its canonical name.

use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    artifacts::{is_contained, is_file, remove_file_logged, slugify, ArtifactStore},
    clock::Clock,
    db::Repository,
    error::{AppError, AppResult},
    locks::TaskLocks,
    models::{BuildRole, BuildState, Task},
    upload::UploadPolicy,
};

/// Zip-bomb ceiling for the total uncompressed size of one archive.
const MAX_EXTRACTED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub const ARCHIVE_INDEX: &str = "index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Build(BuildRole),
    Unrecognized,
}

/// Case-insensitive, first match wins: loader, framework, data, wasm.
pub fn classify(file_name: &str) -> FileRole {
    let name = file_name.to_lowercase();
    if name.contains("loader") {
        FileRole::Build(BuildRole::Loader)
    } else if name.contains("framework") {
        FileRole::Build(BuildRole::Framework)
    } else if name.contains(".data") || name.ends_with("data") {
        FileRole::Build(BuildRole::Data)
    } else if name.contains(".wasm") || name.ends_with("wasm") {
        FileRole::Build(BuildRole::Wasm)
    } else {
        FileRole::Unrecognized
    }
}

/// Stored name of a role's file for single and batch uploads.
pub fn canonical_file_name(role: BuildRole) -> &'static str {
    match role {
        BuildRole::Loader => "Build.loader.js",
        BuildRole::Framework => "Build.framework.js",
        BuildRole::Data => "Build.data",
        BuildRole::Wasm => "Build.wasm",
    }
}

/// Where each role lives inside an archive build named by `slug`.
pub fn archive_layout(slug: &str) -> [(BuildRole, String); 4] {
    [
        (BuildRole::Loader, format!("Build/{slug}.loader.js")),
        (BuildRole::Data, format!("Build/{slug}.data")),
        (BuildRole::Framework, format!("Framework/{slug}.framework.js")),
        (BuildRole::Wasm, format!("Build/{slug}.wasm")),
    ]
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("not a readable zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("archive entry {0:?} escapes the build directory")]
    UnsafeEntry(String),
    #[error("archive expands beyond the allowed size")]
    TooLarge,
}

impl From<ExtractError> for AppError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Io(io) => AppError::storage(format!("extracting archive: {io}")),
            other => AppError::Validation(other.to_string()),
        }
    }
}

/// Unpacks `archive` into `out_dir`, overwriting existing files. Returns the
/// number of files written.
pub fn extract_zip_to_dir(archive: &Path, out_dir: &Path) -> Result<usize, ExtractError> {
    std::fs::create_dir_all(out_dir)?;
    let mut zip = zip::ZipArchive::new(std::fs::File::open(archive)?)?;
    let mut budget = MAX_EXTRACTED_BYTES;
    let mut files = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| ExtractError::UnsafeEntry(entry.name().to_string()))?;
        let outpath = out_dir.join(&rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        let copied = io::copy(&mut (&mut entry).take(budget + 1), &mut outfile)?;
        if copied > budget {
            return Err(ExtractError::TooLarge);
        }
        budget -= copied;
        files += 1;
    }
    Ok(files)
}

pub struct BuildAssembler<'a> {
    pub repo: &'a dyn Repository,
    pub artifacts: &'a ArtifactStore,
    pub locks: &'a TaskLocks,
    pub clock: &'a dyn Clock,
}

impl BuildAssembler<'_> {
    async fn load_task(&self, task_id: Uuid) -> AppResult<Task> {
        self.repo
            .get_task(task_id)
            .await?
            .ok_or(AppError::NotFound("task"))
    }

    fn state_for<'r>(&self, task_id: Uuid, files: impl IntoIterator<Item = (BuildRole, &'r str)>) -> BuildState {
        let mut state = BuildState {
            build_directory: Some(self.artifacts.build_dir(task_id).to_string_lossy().into_owned()),
            ..Default::default()
        };
        for (role, rel) in files {
            state.set_path(role, Some(self.artifacts.served_path(task_id, rel)));
        }
        debug_assert!(state.has_any_role(), "a recorded build directory needs at least one file");
        state
    }

    /// Installs a batch of canonically named files staged in `staged` at the
    /// policy's destination. Loader and data must both be present; otherwise
    /// nothing changes.
    pub async fn commit_batch(&self, policy: &UploadPolicy, staged: &Path, roles: &[BuildRole]) -> AppResult<Task> {
        let task_id = policy.task_id;
        let missing: Vec<&str> = [BuildRole::Loader, BuildRole::Data]
            .into_iter()
            .filter(|r| !roles.contains(r))
            .map(BuildRole::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "a build needs at least a loader and a data file; missing {}",
                missing.join(", ")
            )));
        }
        let state = self.state_for(task_id, roles.iter().map(|r| (*r, canonical_file_name(*r))));
        let task = self.install(task_id, staged, &policy.destination, state).await?;
        info!(task_id = %task_id, channel = "batch", roles = ?roles, "build installed");
        Ok(task)
    }

    /// Extracts an uploaded archive below `staging`, checks it against the
    /// conventional layout for the task's slug, then installs it.
    pub async fn commit_archive(&self, task_id: Uuid, staging: &Path, archive: &Path) -> AppResult<Task> {
        let task = self.load_task(task_id).await?;
        let slug = slugify(&task.title);
        if !is_contained(Path::new(&slug)) || slug.contains(['/', '\\']) {
            return Err(AppError::Validation(format!(
                "task title {:?} cannot name an archive build",
                task.title
            )));
        }

        let extract_dir = staging.join("build");
        let (src, dst) = (archive.to_path_buf(), extract_dir.clone());
        let files = tokio::task::spawn_blocking(move || extract_zip_to_dir(&src, &dst))
            .await
            .map_err(|e| AppError::storage(format!("extraction task failed: {e}")))??;
        remove_file_logged(archive).await;

        let layout = archive_layout(&slug);
        let mut missing = Vec::new();
        for (_, rel) in &layout {
            if !is_file(&extract_dir.join(rel)).await {
                missing.push(rel.as_str());
            }
        }
        if !missing.is_empty() {
            return Err(AppError::storage(format!(
                "archive does not contain the expected build files: {}",
                missing.join(", ")
            )));
        }
        if !is_file(&extract_dir.join(ARCHIVE_INDEX)).await {
            warn!(task_id = %task_id, "archive has no {ARCHIVE_INDEX}");
        }

        let state = self.state_for(task_id, layout.iter().map(|(r, p)| (*r, p.as_str())));
        let target = self.artifacts.build_dir(task_id);
        let task = self.install(task_id, &extract_dir, &target, state).await?;
        info!(task_id = %task_id, channel = "archive", files, slug = %slug, "build installed");
        Ok(task)
    }

    /// Replaces one role's file with `staged_file`, creating the build
    /// directory on first use. A previously recorded file for the role at a
    /// different path is removed best-effort.
    pub async fn replace_slot(&self, task_id: Uuid, role: BuildRole, staged_file: &Path) -> AppResult<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let task = self.load_task(task_id).await?;
        let target = self.artifacts.build_dir(task_id);
        tokio::fs::create_dir_all(&target).await?;

        let name = canonical_file_name(role);
        let dest = target.join(name);
        if let Some(prev) = task.build.path(role).and_then(|p| self.artifacts.resolve_served(p)) {
            if prev != dest {
                remove_file_logged(&prev).await;
            }
        }
        tokio::fs::rename(staged_file, &dest)
            .await
            .map_err(|e| AppError::storage(format!("writing {name}: {e}")))?;

        let mut state = task.build.clone();
        state.build_directory = Some(target.to_string_lossy().into_owned());
        state.set_path(role, Some(self.artifacts.served_path(task_id, name)));
        debug_assert!(state.has_any_role());
        let updated = self
            .repo
            .set_build_state(task_id, &state, self.clock.now())
            .await?
            .ok_or(AppError::NotFound("task"))?;
        info!(task_id = %task_id, channel = "single", role = %role, complete = state.is_complete(), "build file replaced");
        Ok(updated)
    }

    /// Swaps `staged` in as the task's build directory `target` and records
    /// `state`. The previous build is restored if the record cannot be saved.
    async fn install(&self, task_id: Uuid, staged: &Path, target: &Path, state: BuildState) -> AppResult<Task> {
        let _guard = self.locks.acquire(task_id).await;
        let task = self.load_task(task_id).await?;
        let retired = self
            .artifacts
            .swap_in(staged, target)
            .await
            .map_err(|e| AppError::storage(format!("installing build: {e}")))?;

        let saved = self.repo.set_build_state(task_id, &state, self.clock.now()).await;
        match saved {
            Ok(Some(updated)) => {
                if let Some(old) = retired {
                    self.artifacts.discard(&old).await;
                }
                self.discard_foreign_dir(&task, target).await;
                Ok(updated)
            }
            Ok(None) => {
                self.artifacts.restore(target, retired).await;
                Err(AppError::NotFound("task"))
            }
            Err(e) => {
                self.artifacts.restore(target, retired).await;
                Err(e)
            }
        }
    }

    /// Deletes a task's build directory. The caller holds the task's lock.
    pub async fn remove_build(&self, task: &Task) {
        let target = self.artifacts.build_dir(task.id);
        self.artifacts.discard(&target).await;
        self.discard_foreign_dir(task, &target).await;
    }

    /// A recorded directory other than the derived one, if it lies inside the
    /// build tree, is left over from an older layout.
    async fn discard_foreign_dir(&self, task: &Task, target: &Path) {
        let Some(recorded) = task.build.build_directory.as_deref().map(PathBuf::from) else {
            return;
        };
        if recorded != target && recorded.starts_with(self.artifacts.builds_root()) {
            self.artifacts.discard(&recorded).await;
        }
    }
}
