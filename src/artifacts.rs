//! On-disk layout of uploaded artifacts.
//!
//! ```text
//! <root>/builds/<taskId>/...        served at /<prefix>/<taskId>/...
//! <root>/materials/<courseId>/...   course materials
//! <root>/staging/...                scratch space for uploads in flight
//! ```
//!
//! Staging shares the filesystem with `builds/` so a finished build can be
//! moved into place with a single rename.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use uuid::Uuid;
use walkdir::WalkDir;

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    static_prefix: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, static_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            static_prefix: static_prefix.into(),
        }
    }

    pub fn builds_root(&self) -> PathBuf {
        self.root.join("builds")
    }

    pub fn materials_root(&self) -> PathBuf {
        self.root.join("materials")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn static_prefix(&self) -> &str {
        &self.static_prefix
    }

    pub async fn ensure_layout(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(self.builds_root()).await?;
        tokio::fs::create_dir_all(self.materials_root()).await?;
        tokio::fs::create_dir_all(self.staging_root()).await
    }

    /// The build directory for a task. Keyed by id so renames never orphan it.
    pub fn build_dir(&self, task_id: Uuid) -> PathBuf {
        self.builds_root().join(task_id.to_string())
    }

    /// Browser-facing path of `rel` inside a task's build directory.
    pub fn served_path(&self, task_id: Uuid, rel: &str) -> String {
        let encoded: Vec<String> = rel
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
            .collect();
        format!("/{}/{}/{}", self.static_prefix, task_id, encoded.join("/"))
    }

    /// Maps a served path back onto disk. `None` if it does not belong to the
    /// build tree or tries to leave it.
    pub fn resolve_served(&self, served: &str) -> Option<PathBuf> {
        let rest = served
            .strip_prefix('/')?
            .strip_prefix(self.static_prefix.as_str())?
            .strip_prefix('/')?;
        let mut path = self.builds_root();
        for raw in rest.split('/') {
            let seg = percent_decode_str(raw).decode_utf8().ok()?;
            if seg.is_empty() || seg == "." || seg == ".." || seg.contains(['/', '\\']) {
                return None;
            }
            path.push(&*seg);
        }
        Some(path)
    }

    /// A fresh, not yet created, directory under staging.
    pub fn new_staging_dir(&self) -> PathBuf {
        self.staging_root().join(Uuid::new_v4().to_string())
    }

    /// Moves `staged` into `target`. An existing `target` is moved aside first
    /// and its new location returned so the caller can drop or restore it.
    pub async fn swap_in(&self, staged: &Path, target: &Path) -> io::Result<Option<PathBuf>> {
        let retired = if tokio::fs::try_exists(target).await? {
            let aside = self.staging_root().join(format!("retired-{}", Uuid::new_v4()));
            tokio::fs::rename(target, &aside).await?;
            Some(aside)
        } else {
            None
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::rename(staged, target).await {
            if let Some(aside) = &retired {
                if let Err(back) = tokio::fs::rename(aside, target).await {
                    tracing::warn!(error = %back, path = %aside.display(), "failed to put previous build back");
                }
            }
            return Err(e);
        }
        Ok(retired)
    }

    /// Undo of [`swap_in`](Self::swap_in) after the new build failed to persist.
    pub async fn restore(&self, target: &Path, retired: Option<PathBuf>) {
        remove_dir_logged(target).await;
        if let Some(aside) = retired {
            if let Err(e) = tokio::fs::rename(&aside, target).await {
                tracing::warn!(error = %e, path = %aside.display(), "failed to restore previous build");
            }
        }
    }

    /// Best-effort directory removal; failures are logged.
    pub async fn discard(&self, path: &Path) {
        remove_dir_logged(path).await;
    }

    pub fn material_path(&self, stored_path: &str) -> PathBuf {
        self.materials_root().join(stored_path)
    }

    pub fn course_materials_dir(&self, course_id: Uuid) -> PathBuf {
        self.materials_root().join(course_id.to_string())
    }
}

async fn remove_dir_logged(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to remove directory"),
    }
}

/// Best-effort file removal; failures are logged.
pub async fn remove_file_logged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to remove file"),
    }
}

pub async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Regular files below `dir`, relative to it, sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

/// Lower-cased title with whitespace runs replaced by hyphens.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// True when `rel` is a plain relative path that stays below its base.
pub fn is_contained(rel: &Path) -> bool {
    rel.components().all(|c| matches!(c, Component::Normal(_))) && rel.components().next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        ArtifactStore::new("/srv/data", "builds")
    }

    #[test]
    fn slug_lowercases_and_hyphenates() {
        assert_eq!(slugify("Xor Lab"), "xor-lab");
        assert_eq!(slugify("  Maze   Runner 2 "), "maze-runner-2");
    }

    #[test]
    fn served_paths_round_trip_to_disk() {
        let s = store();
        let id = Uuid::new_v4();
        let served = s.served_path(id, "Build/my lab#1.loader.js");
        assert_eq!(served, format!("/builds/{id}/Build/my%20lab%231.loader.js"));
        let disk = s.resolve_served(&served).unwrap();
        assert_eq!(
            disk,
            PathBuf::from(format!("/srv/data/builds/{id}/Build/my lab#1.loader.js"))
        );
    }

    #[test]
    fn resolve_rejects_escapes_and_foreign_prefixes() {
        let s = store();
        assert!(s.resolve_served("/builds/x/../../etc/passwd").is_none());
        assert!(s.resolve_served("/builds/x/%2e%2e/secret").is_none());
        assert!(s.resolve_served("/other/x/Build.data").is_none());
        assert!(s.resolve_served("/builds/x/a%2Fb").is_none());
    }

    #[test]
    fn containment_check() {
        assert!(is_contained(Path::new("Build/x.data")));
        assert!(!is_contained(Path::new("../x.data")));
        assert!(!is_contained(Path::new("/etc/passwd")));
        assert!(!is_contained(Path::new("")));
    }

    #[tokio::test]
    async fn swap_in_moves_previous_build_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let s = ArtifactStore::new(tmp.path(), "builds");
        s.ensure_layout().await.unwrap();
        let target = s.build_dir(Uuid::new_v4());

        tokio::fs::create_dir_all(&target).await.unwrap();
        tokio::fs::write(target.join("old.data"), b"old").await.unwrap();

        let staged = s.new_staging_dir();
        tokio::fs::create_dir_all(&staged).await.unwrap();
        tokio::fs::write(staged.join("Build.data"), b"new").await.unwrap();

        let retired = s.swap_in(&staged, &target).await.unwrap();
        assert_eq!(list_files(&target), vec!["Build.data".to_string()]);

        s.restore(&target, retired).await;
        assert_eq!(list_files(&target), vec!["old.data".to_string()]);
    }
}
