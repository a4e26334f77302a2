use thiserror::Error;

/// Every failure the binding layer and the worker protocol can report.
///
/// The first six variants make up the engine-boundary taxonomy; the remaining ones wrap the
/// ambient failures (rusqlite connection lifecycle, file I/O on the session backing file, JSON
/// decoding of inbound messages, a vanished worker thread).
#[derive(Debug, Error)]
pub enum SqlWorkerError {
    /// SQL failed to compile.
    #[error("{message}")]
    PrepareError {
        message: String,
        sql: Option<String>,
    },

    /// Unsupported host value, or the engine rejected a bind call.
    #[error("{0}")]
    BindError(String),

    /// `step`/execute returned a status other than row or done.
    #[error("{}", with_sql(.message, .sql))]
    EngineError {
        message: String,
        sql: Option<String>,
    },

    /// Operation attempted on a finalized statement or a closed session.
    #[error("{0}")]
    HandleClosed(String),

    /// Unrecognized action or a missing required field.
    #[error("{0}")]
    ProtocolError(String),

    /// The memory bridge could not satisfy an allocation.
    #[error("out of memory: cannot allocate {requested} bytes (limit {limit})")]
    OutOfMemory { requested: usize, limit: usize },

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl SqlWorkerError {
    pub(crate) fn statement_closed() -> Self {
        SqlWorkerError::HandleClosed("Statement closed".into())
    }

    pub(crate) fn database_closed() -> Self {
        SqlWorkerError::HandleClosed("Database closed".into())
    }
}

fn with_sql(message: &str, sql: &Option<String>) -> String {
    match sql {
        Some(sql) => format!("{message} (in statement: {sql})"),
        None => message.to_string(),
    }
}

/// Failure reported by a host callback; becomes the engine-side result error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FunctionError(pub String);

impl From<&str> for FunctionError {
    fn from(message: &str) -> Self {
        FunctionError(message.to_string())
    }
}

impl From<String> for FunctionError {
    fn from(message: String) -> Self {
        FunctionError(message)
    }
}
