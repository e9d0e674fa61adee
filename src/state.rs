use std::sync::Arc;

use crate::{
    artifacts::ArtifactStore, build::BuildAssembler, clock::Clock, config::Config,
    db::Repository, locks::TaskLocks,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn Repository>,
    pub artifacts: ArtifactStore,
    pub locks: Arc<TaskLocks>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: Config, repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        let artifacts = ArtifactStore::new(config.data_dir.clone(), config.static_prefix.clone());
        Self {
            config: Arc::new(config),
            repo,
            artifacts,
            locks: Arc::new(TaskLocks::new()),
            clock,
        }
    }

    pub fn assembler(&self) -> BuildAssembler<'_> {
        BuildAssembler {
            repo: self.repo.as_ref(),
            artifacts: &self.artifacts,
            locks: &self.locks,
            clock: self.clock.as_ref(),
        }
    }
}
