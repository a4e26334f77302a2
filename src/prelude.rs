//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::engine::{Engine, EngineOptions, EngineOptionsBuilder};
pub use crate::error::{FunctionError, SqlWorkerError};
pub use crate::results::{QueryResult, RowObject};
pub use crate::sqlite::{
    Aggregate, DatabaseSession, StatementId, StatementIterator, StatementState, aggregate,
};
pub use crate::types::{Params, QueryConfig, StepResult, Value};
pub use crate::worker::{Action, ProtocolHandler, Request, Response, ResponseStream, SqlWorker};
