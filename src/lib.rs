//! Embedded SQLite with a marshaling layer, host-defined SQL functions and a
//! message-correlated worker protocol.
//!
//! - [`Engine`] is the process-wide initialization handle; create it once and pass it to
//!   every session.
//! - [`DatabaseSession`] owns one connection, its prepared statements and its host functions.
//! - [`ProtocolHandler`] and [`SqlWorker`] speak the `open`/`exec`/`each`/`export`/`close`
//!   protocol, synchronously or from a dedicated thread.
//!
//! ```rust
//! use sql_worker::prelude::*;
//!
//! # fn main() -> Result<(), SqlWorkerError> {
//! let engine = Engine::new()?;
//! let mut db = engine.open_session(None)?;
//! db.run("CREATE TABLE t(a, b)", None)?;
//! let row = Params::positional([Value::from(1), Value::from("x")]);
//! db.run("INSERT INTO t VALUES (?, ?)", Some(&row))?;
//!
//! let results = db.exec("SELECT a, b FROM t", None, QueryConfig::default())?;
//! assert_eq!(results[0].columns, vec!["a", "b"]);
//! assert_eq!(results[0].values, vec![vec![Value::Integer(1), Value::from("x")]]);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod prelude;
pub mod results;
pub mod sqlite;
pub mod types;
pub mod worker;

pub use engine::{Engine, EngineOptions, EngineOptionsBuilder};
pub use error::{FunctionError, SqlWorkerError};
pub use results::{QueryResult, RowObject};
pub use sqlite::{DatabaseSession, StatementId};
pub use types::{Params, QueryConfig, StepResult, Value};
pub use worker::{ProtocolHandler, Request, Response, SqlWorker};
