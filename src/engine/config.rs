use std::path::PathBuf;

use crate::error::SqlWorkerError;

use super::Engine;

/// Default ceiling for the memory bridge (16 MiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Options for initializing an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on bytes the memory bridge may hand out.
    pub memory_limit: usize,
    /// Directory for session database files; a private temporary directory when `None`.
    pub workspace: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            workspace: None,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::new()
    }

    #[must_use]
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    #[must_use]
    pub fn with_workspace(mut self, workspace: PathBuf) -> Self {
        self.workspace = Some(workspace);
        self
    }
}

/// Fluent builder for engine options.
#[derive(Debug, Clone, Default)]
pub struct EngineOptionsBuilder {
    opts: EngineOptions,
}

impl EngineOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn memory_limit(mut self, memory_limit: usize) -> Self {
        self.opts.memory_limit = memory_limit;
        self
    }

    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.opts.workspace = Some(workspace.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> EngineOptions {
        self.opts
    }

    /// Initialize an [`Engine`] from these options.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError` if the engine library fails to initialize or the workspace
    /// directory cannot be created.
    pub fn build(self) -> Result<Engine, SqlWorkerError> {
        Engine::initialize(self.finish())
    }
}
