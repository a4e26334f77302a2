//! Prepared-statement records and their state machine.

use std::ffi::c_int;
use std::fmt;

use tracing::debug;

use crate::engine::{Address, Engine};
use crate::error::SqlWorkerError;
use crate::types::{Params, QueryConfig, StepResult, Value};

use super::arena::ArenaKey;
use super::marshal;
use super::raw::{self, RawDb, RawStatement};

/// Opaque id of a statement owned by a [`DatabaseSession`](super::session::DatabaseSession).
///
/// Ids are never reused: once a statement is finalized its id fails every lookup with
/// `SqlWorkerError::HandleClosed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub(crate) ArenaKey);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// Where a statement sits between prepare and finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Freshly prepared, or reset; no bindings.
    Ready,
    Bound,
    /// A row is available to the getters.
    Row,
    Done,
}

pub(crate) struct StatementHandle {
    raw: RawStatement,
    state: StatementState,
    /// Next 1-based parameter index used by positional binding.
    next_param: c_int,
    /// Next 0-based column read by the typed getters.
    next_column: c_int,
    allocations: Vec<Address>,
}

impl StatementHandle {
    pub(crate) fn new(raw: RawStatement) -> Self {
        Self {
            raw,
            state: StatementState::Ready,
            next_param: 1,
            next_column: 0,
            allocations: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> StatementState {
        self.state
    }

    pub(crate) fn sql(&self) -> String {
        self.raw.sql().unwrap_or_default()
    }

    fn release_allocations(&mut self, engine: &Engine) -> Result<(), SqlWorkerError> {
        if self.allocations.is_empty() {
            return Ok(());
        }
        let mut bridge = engine.memory()?;
        for address in self.allocations.drain(..) {
            bridge.free(address);
        }
        Ok(())
    }

    /// Clear bindings and rewind the cursor. True when both engine calls succeed.
    pub(crate) fn reset(&mut self, engine: &Engine) -> Result<bool, SqlWorkerError> {
        let cleared = self.raw.clear_bindings() == raw::SQLITE_OK;
        let rewound = self.raw.reset() == raw::SQLITE_OK;
        self.release_allocations(engine)?;
        self.state = StatementState::Ready;
        self.next_param = 1;
        self.next_column = 0;
        Ok(cleared && rewound)
    }

    /// Reset, then bind every parameter.
    pub(crate) fn bind(
        &mut self,
        engine: &Engine,
        db: RawDb,
        params: &Params,
    ) -> Result<(), SqlWorkerError> {
        self.reset(engine)?;
        match params {
            Params::Positional(values) => {
                for value in values {
                    let index = self.next_param;
                    self.next_param += 1;
                    self.bind_at(engine, db, index, value)?;
                }
            }
            Params::Named(pairs) => {
                for (name, value) in pairs {
                    let index = self.raw.parameter_index(name);
                    if index == 0 {
                        debug!(name = %name, "skipping unknown named parameter");
                        continue;
                    }
                    self.bind_at(engine, db, index, value)?;
                }
            }
        }
        self.state = StatementState::Bound;
        Ok(())
    }

    fn bind_at(
        &mut self,
        engine: &Engine,
        db: RawDb,
        index: c_int,
        value: &Value,
    ) -> Result<(), SqlWorkerError> {
        let rc = {
            let mut bridge = engine.memory()?;
            marshal::bind_value(&self.raw, index, value, &mut bridge, &mut self.allocations)?
        };
        if rc == raw::SQLITE_OK {
            return Ok(());
        }
        let message = db.errmsg();
        Err(SqlWorkerError::BindError(if message.is_empty() {
            raw::error_string(rc)
        } else {
            message
        }))
    }

    pub(crate) fn step(&mut self, db: RawDb) -> Result<StepResult, SqlWorkerError> {
        self.next_column = 0;
        match self.raw.step() {
            raw::SQLITE_ROW => {
                self.state = StatementState::Row;
                Ok(StepResult::RowAvailable)
            }
            raw::SQLITE_DONE => {
                self.state = StatementState::Done;
                Ok(StepResult::Done)
            }
            _ => {
                self.state = StatementState::Done;
                Err(SqlWorkerError::EngineError {
                    message: db.errmsg(),
                    sql: self.raw.sql(),
                })
            }
        }
    }

    fn require_row(&self) -> Result<(), SqlWorkerError> {
        if self.state == StatementState::Row {
            Ok(())
        } else {
            Err(SqlWorkerError::EngineError {
                message: "no current row: step the statement first".to_string(),
                sql: self.raw.sql(),
            })
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        usize::try_from(self.raw.column_count()).unwrap_or(0)
    }

    pub(crate) fn column_names(&self) -> Vec<String> {
        (0..self.raw.column_count())
            .map(|index| self.raw.column_name(index))
            .collect()
    }

    /// Decode the current row, or only the selected columns. Out-of-range selections read as
    /// NULL.
    pub(crate) fn row(
        &self,
        selector: Option<&[usize]>,
        config: QueryConfig,
    ) -> Result<Vec<Value>, SqlWorkerError> {
        self.require_row()?;
        let count = self.column_count();
        let read = |index: usize| {
            if index < count {
                c_int::try_from(index)
                    .map_or(Value::Null, |index| marshal::column_value(&self.raw, index, config))
            } else {
                Value::Null
            }
        };
        Ok(match selector {
            Some(indices) => indices.iter().copied().map(read).collect(),
            None => (0..count).map(read).collect(),
        })
    }

    /// Column index for a typed getter: the explicit one, or the implicit cursor.
    fn column_cursor(&mut self, explicit: Option<usize>) -> Result<c_int, SqlWorkerError> {
        self.require_row()?;
        let index = match explicit {
            Some(index) => c_int::try_from(index).unwrap_or(c_int::MAX),
            None => {
                let index = self.next_column;
                self.next_column += 1;
                index
            }
        };
        Ok(index)
    }

    pub(crate) fn get_number(&mut self, explicit: Option<usize>) -> Result<f64, SqlWorkerError> {
        let index = self.column_cursor(explicit)?;
        Ok(self.raw.column_double(index))
    }

    pub(crate) fn get_big_int(&mut self, explicit: Option<usize>) -> Result<i64, SqlWorkerError> {
        let index = self.column_cursor(explicit)?;
        Ok(self.raw.column_int64(index))
    }

    pub(crate) fn get_string(
        &mut self,
        explicit: Option<usize>,
    ) -> Result<String, SqlWorkerError> {
        let index = self.column_cursor(explicit)?;
        Ok(crate::engine::memory::decode_text_lossy(
            &self.raw.column_text(index),
        ))
    }

    pub(crate) fn get_blob(&mut self, explicit: Option<usize>) -> Result<Vec<u8>, SqlWorkerError> {
        let index = self.column_cursor(explicit)?;
        Ok(self.raw.column_blob(index))
    }

    /// Release the engine statement and every staged allocation.
    pub(crate) fn finalize(mut self, engine: &Engine) -> Result<bool, SqlWorkerError> {
        let released = self.release_allocations(engine);
        let ok = self.raw.finalize() == raw::SQLITE_OK;
        released.map(|()| ok)
    }
}
