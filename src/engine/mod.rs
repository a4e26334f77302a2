//! Process-wide engine handle.
//!
//! Created once at host startup and passed into every session constructor; clones share the
//! same memory bridge and workspace directory.

pub mod config;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::SqlWorkerError;
use crate::sqlite::raw;
use crate::sqlite::session::DatabaseSession;

pub use config::{DEFAULT_MEMORY_LIMIT, EngineOptions, EngineOptionsBuilder};
pub use memory::{Address, MemoryBridge};

/// Initialized engine: the linear heap plus the directory that backs session files.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    options: EngineOptions,
    memory: Mutex<MemoryBridge>,
    workspace: Workspace,
    next_file: AtomicU64,
}

enum Workspace {
    Temp(TempDir),
    Dir(PathBuf),
}

impl Workspace {
    fn path(&self) -> &Path {
        match self {
            Workspace::Temp(dir) => dir.path(),
            Workspace::Dir(path) => path,
        }
    }
}

impl Engine {
    /// Initialize the engine library and prepare the session workspace.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::EngineError` if the library refuses to initialize and
    /// `SqlWorkerError::IoError` if the workspace cannot be created.
    pub fn initialize(options: EngineOptions) -> Result<Self, SqlWorkerError> {
        let rc = raw::initialize_library();
        if rc != raw::SQLITE_OK {
            return Err(SqlWorkerError::EngineError {
                message: format!("engine initialization failed: {}", raw::error_string(rc)),
                sql: None,
            });
        }

        let workspace = match &options.workspace {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Workspace::Dir(path.clone())
            }
            None => Workspace::Temp(tempfile::Builder::new().prefix("sql-worker-").tempdir()?),
        };
        info!(
            workspace = %workspace.path().display(),
            memory_limit = options.memory_limit,
            "engine initialized"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                memory: Mutex::new(MemoryBridge::new(options.memory_limit)),
                options,
                workspace,
                next_file: AtomicU64::new(1),
            }),
        })
    }

    /// Initialize with default options.
    ///
    /// # Errors
    ///
    /// See [`Engine::initialize`].
    pub fn new() -> Result<Self, SqlWorkerError> {
        Self::initialize(EngineOptions::default())
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Lock the memory bridge.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::ConnectionError` if a previous holder panicked.
    pub fn memory(&self) -> Result<MutexGuard<'_, MemoryBridge>, SqlWorkerError> {
        self.inner.memory.lock().map_err(|err| {
            SqlWorkerError::ConnectionError(format!("memory bridge mutex poisoned: {err}"))
        })
    }

    /// Live memory-bridge allocations across every session of this engine.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.memory().map_or(0, |bridge| bridge.live_allocations())
    }

    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.inner.workspace.path()
    }

    /// Open a new session, optionally seeded with a database image.
    ///
    /// # Errors
    ///
    /// See [`DatabaseSession::open`].
    pub fn open_session(&self, buffer: Option<&[u8]>) -> Result<DatabaseSession, SqlWorkerError> {
        DatabaseSession::open(self, buffer)
    }

    /// Drop this handle, logging whether it was the last one.
    pub fn shutdown(self) {
        let remaining = Arc::strong_count(&self.inner) - 1;
        debug!(remaining, "engine handle released");
    }

    pub(crate) fn next_database_path(&self) -> PathBuf {
        let n = self.inner.next_file.fetch_add(1, Ordering::Relaxed);
        self.workspace().join(format!("dbfile_{n}"))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("workspace", &self.workspace())
            .field("memory_limit", &self.inner.options.memory_limit)
            .finish()
    }
}
