//! One open database connection and everything it owns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{FunctionError, SqlWorkerError};
use crate::results::{QueryResult, RowObject};
use crate::types::{Params, QueryConfig, StepResult, Value};

use super::arena::HandleArena;
use super::functions::{Aggregate, CallbackSlot};
use super::iter::StatementIterator;
use super::raw::{self, RawDb};
use super::statement::{StatementHandle, StatementId, StatementState};

/// A database session: the connection, its prepared statements and its host functions.
///
/// Sessions are single-threaded. Run independent sessions on independent threads (see
/// [`SqlWorker`](crate::worker::SqlWorker)) rather than sharing one.
pub struct DatabaseSession {
    engine: Engine,
    path: PathBuf,
    conn: Option<Connection>,
    statements: HandleArena<StatementHandle>,
    functions: HashMap<String, CallbackSlot>,
}

impl DatabaseSession {
    /// Open a session backed by a fresh file in the engine workspace, optionally seeded with a
    /// database image.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::IoError` if the image cannot be written and
    /// `SqlWorkerError::SqliteError` if the engine cannot open the file.
    pub fn open(engine: &Engine, buffer: Option<&[u8]>) -> Result<Self, SqlWorkerError> {
        let path = engine.next_database_path();
        if let Some(bytes) = buffer {
            std::fs::write(&path, bytes)?;
        }
        let conn = Connection::open(&path)?;
        info!(path = %path.display(), seeded = buffer.is_some(), "session opened");
        Ok(Self {
            engine: engine.clone(),
            path,
            conn: Some(conn),
            statements: HandleArena::default(),
            functions: HashMap::new(),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Database file backing this session.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn db(&self) -> Result<RawDb, SqlWorkerError> {
        self.conn
            .as_ref()
            .and_then(RawDb::of)
            .ok_or_else(SqlWorkerError::database_closed)
    }

    fn handle(&self, id: StatementId) -> Result<&StatementHandle, SqlWorkerError> {
        self.statements
            .get(id.0)
            .ok_or_else(SqlWorkerError::statement_closed)
    }

    fn handle_mut(&mut self, id: StatementId) -> Result<&mut StatementHandle, SqlWorkerError> {
        self.statements
            .get_mut(id.0)
            .ok_or_else(SqlWorkerError::statement_closed)
    }

    /// Compile the first statement at byte `offset` of `sql`. Returns `None` when only
    /// whitespace or comments remain, plus the offset just past what was consumed.
    pub(crate) fn prepare_at(
        &mut self,
        sql: &str,
        offset: usize,
    ) -> Result<(Option<StatementId>, usize), SqlWorkerError> {
        let db = self.db()?;
        let prepared = db.prepare(sql, offset);
        if prepared.rc != raw::SQLITE_OK {
            return Err(SqlWorkerError::PrepareError {
                message: db.errmsg(),
                sql: Some(sql.get(offset..).unwrap_or_default().to_string()),
            });
        }
        let id = prepared
            .stmt
            .map(|stmt| StatementId(self.statements.insert(StatementHandle::new(stmt))));
        Ok((id, prepared.tail))
    }

    /// Prepare the first statement in `sql`.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::PrepareError` if the engine rejects the text or it holds no
    /// statement at all.
    pub fn prepare(&mut self, sql: &str) -> Result<StatementId, SqlWorkerError> {
        match self.prepare_at(sql, 0)? {
            (Some(id), _) => Ok(id),
            (None, _) => Err(SqlWorkerError::PrepareError {
                message: "Nothing to prepare".to_string(),
                sql: Some(sql.to_string()),
            }),
        }
    }

    /// Prepare and bind in one go; the statement is finalized again if binding fails.
    ///
    /// # Errors
    ///
    /// See [`DatabaseSession::prepare`] and [`DatabaseSession::bind`].
    pub fn prepare_with(
        &mut self,
        sql: &str,
        params: Option<&Params>,
    ) -> Result<StatementId, SqlWorkerError> {
        let id = self.prepare(sql)?;
        if let Some(params) = params {
            if let Err(err) = self.bind(id, params) {
                let _ = self.finalize(id);
                return Err(err);
            }
        }
        Ok(id)
    }

    /// Replace the statement's bindings.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` for a finalized statement, `BindError` if the
    /// engine rejects a value and `OutOfMemory` if the bridge cannot stage text or blob bytes.
    pub fn bind(&mut self, id: StatementId, params: &Params) -> Result<(), SqlWorkerError> {
        let db = self.db()?;
        let engine = self.engine.clone();
        self.handle_mut(id)?.bind(&engine, db, params)
    }

    /// Advance the cursor by one row.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::EngineError` carrying the engine message and the statement's
    /// SQL when the step fails.
    pub fn step(&mut self, id: StatementId) -> Result<StepResult, SqlWorkerError> {
        let db = self.db()?;
        self.handle_mut(id)?.step(db)
    }

    /// Current row, optionally restricted to `selector` column indexes.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::EngineError` if no row is available.
    pub fn get_row(
        &self,
        id: StatementId,
        selector: Option<&[usize]>,
        config: QueryConfig,
    ) -> Result<Vec<Value>, SqlWorkerError> {
        self.handle(id)?.row(selector, config)
    }

    /// Bind `params`, step, then read the row.
    ///
    /// # Errors
    ///
    /// As for bind, step and [`DatabaseSession::get_row`]; a statement that produces no row is
    /// an `EngineError`.
    pub fn get_row_with(
        &mut self,
        id: StatementId,
        params: &Params,
        config: QueryConfig,
    ) -> Result<Vec<Value>, SqlWorkerError> {
        self.bind(id, params)?;
        self.step(id)?;
        self.get_row(id, None, config)
    }

    /// Current row as a column-name map.
    ///
    /// # Errors
    ///
    /// See [`DatabaseSession::get_row`].
    pub fn get_as_object(
        &self,
        id: StatementId,
        config: QueryConfig,
    ) -> Result<RowObject, SqlWorkerError> {
        let handle = self.handle(id)?;
        Ok(RowObject::new(
            Arc::new(handle.column_names()),
            handle.row(None, config)?,
        ))
    }

    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` for a finalized statement.
    pub fn column_names(&self, id: StatementId) -> Result<Vec<String>, SqlWorkerError> {
        Ok(self.handle(id)?.column_names())
    }

    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` for a finalized statement.
    pub fn statement_state(&self, id: StatementId) -> Result<StatementState, SqlWorkerError> {
        Ok(self.handle(id)?.state())
    }

    /// SQL text the statement was prepared from.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` for a finalized statement.
    pub fn statement_sql(&self, id: StatementId) -> Result<String, SqlWorkerError> {
        Ok(self.handle(id)?.sql())
    }

    /// Read the next column (or `index`) of the current row as a float.
    ///
    /// # Errors
    ///
    /// `HandleClosed` for a finalized statement, `EngineError` when no row is available.
    pub fn get_number(
        &mut self,
        id: StatementId,
        index: Option<usize>,
    ) -> Result<f64, SqlWorkerError> {
        self.handle_mut(id)?.get_number(index)
    }

    /// Read the next column (or `index`) as an exact 64-bit integer.
    ///
    /// # Errors
    ///
    /// As for [`DatabaseSession::get_number`].
    pub fn get_big_int(
        &mut self,
        id: StatementId,
        index: Option<usize>,
    ) -> Result<i64, SqlWorkerError> {
        self.handle_mut(id)?.get_big_int(index)
    }

    /// # Errors
    ///
    /// As for [`DatabaseSession::get_number`].
    pub fn get_string(
        &mut self,
        id: StatementId,
        index: Option<usize>,
    ) -> Result<String, SqlWorkerError> {
        self.handle_mut(id)?.get_string(index)
    }

    /// # Errors
    ///
    /// As for [`DatabaseSession::get_number`].
    pub fn get_blob(
        &mut self,
        id: StatementId,
        index: Option<usize>,
    ) -> Result<Vec<u8>, SqlWorkerError> {
        self.handle_mut(id)?.get_blob(index)
    }

    /// Clear bindings and rewind. Returns whether both engine calls reported success.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` for a finalized statement.
    pub fn reset(&mut self, id: StatementId) -> Result<bool, SqlWorkerError> {
        let engine = self.engine.clone();
        self.handle_mut(id)?.reset(&engine)
    }

    /// Release the statement. Every later use of `id` fails with `HandleClosed`.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` if `id` was already finalized.
    pub fn finalize(&mut self, id: StatementId) -> Result<bool, SqlWorkerError> {
        let handle = self
            .statements
            .remove(id.0)
            .ok_or_else(SqlWorkerError::statement_closed)?;
        handle.finalize(&self.engine)
    }

    /// Bind (when given), step once and reset.
    ///
    /// # Errors
    ///
    /// As for bind and step.
    pub fn run_statement(
        &mut self,
        id: StatementId,
        params: Option<&Params>,
    ) -> Result<(), SqlWorkerError> {
        if let Some(params) = params {
            self.bind(id, params)?;
        }
        self.step(id)?;
        self.reset(id)?;
        Ok(())
    }

    /// Execute SQL without collecting rows.
    ///
    /// With parameters only the first statement runs; without them the whole text goes to the
    /// engine's batch entry point.
    ///
    /// # Errors
    ///
    /// Returns `PrepareError`, `BindError` or `EngineError` from the failing statement.
    pub fn run(&mut self, sql: &str, params: Option<&Params>) -> Result<(), SqlWorkerError> {
        let Some(params) = params else {
            let conn = self
                .conn
                .as_ref()
                .ok_or_else(SqlWorkerError::database_closed)?;
            return conn
                .execute_batch(sql)
                .map_err(|err| SqlWorkerError::EngineError {
                    message: err.to_string(),
                    sql: None,
                });
        };
        let id = self.prepare_with(sql, Some(params))?;
        let stepped = self.step(id);
        self.finalize(id)?;
        stepped.map(|_| ())
    }

    /// Run every statement of `sql`, collecting one result block per statement that produced
    /// rows. `params` are bound to each statement.
    ///
    /// # Errors
    ///
    /// Stops at the first failing statement; statements already run stay applied.
    pub fn exec(
        &mut self,
        sql: &str,
        params: Option<&Params>,
        config: QueryConfig,
    ) -> Result<Vec<QueryResult>, SqlWorkerError> {
        let mut results = Vec::new();
        let mut offset = 0;
        loop {
            let (id, next) = self.prepare_at(sql, offset)?;
            let Some(id) = id else {
                break;
            };
            offset = next;
            let collected = self.collect_statement(id, params, config);
            self.finalize(id)?;
            if let Some(block) = collected? {
                results.push(block);
            }
        }
        Ok(results)
    }

    fn collect_statement(
        &mut self,
        id: StatementId,
        params: Option<&Params>,
        config: QueryConfig,
    ) -> Result<Option<QueryResult>, SqlWorkerError> {
        if let Some(params) = params {
            self.bind(id, params)?;
        }
        let mut block: Option<QueryResult> = None;
        while self.step(id)? == StepResult::RowAvailable {
            let row = self.get_row(id, None, config)?;
            match block.as_mut() {
                Some(block) => block.values.push(row),
                None => {
                    block = Some(QueryResult {
                        columns: self.column_names(id)?,
                        values: vec![row],
                    });
                }
            }
        }
        Ok(block)
    }

    /// Run the first statement of `sql`, handing each row to `callback` as a [`RowObject`].
    /// Returns the number of rows delivered.
    ///
    /// # Errors
    ///
    /// As for [`DatabaseSession::prepare_with`] and step. Rows delivered before a failure stay
    /// delivered.
    pub fn each<F>(
        &mut self,
        sql: &str,
        params: Option<&Params>,
        config: QueryConfig,
        mut callback: F,
    ) -> Result<usize, SqlWorkerError>
    where
        F: FnMut(RowObject),
    {
        let id = self.prepare_with(sql, params)?;
        let columns = Arc::new(self.handle(id)?.column_names());
        let mut delivered = 0;
        let outcome = loop {
            match self.step(id) {
                Ok(StepResult::RowAvailable) => match self.get_row(id, None, config) {
                    Ok(values) => {
                        callback(RowObject::new(Arc::clone(&columns), values));
                        delivered += 1;
                    }
                    Err(err) => break Err(err),
                },
                Ok(StepResult::Done) => break Ok(delivered),
                Err(err) => break Err(err),
            }
        };
        self.finalize(id)?;
        outcome
    }

    /// Lazily prepare the statements of a multi-statement text, one per advance.
    #[must_use]
    pub fn iterate_statements(&self, sql: &str) -> StatementIterator {
        StatementIterator::new(sql)
    }

    /// Rows changed by the most recent statement.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` if the session is closed.
    pub fn changes(&self) -> Result<u64, SqlWorkerError> {
        Ok(self.db()?.changes())
    }

    /// Ids of the statements not yet finalized.
    #[must_use]
    pub fn live_statements(&self) -> Vec<StatementId> {
        self.statements.keys().into_iter().map(StatementId).collect()
    }

    /// Register a scalar function, replacing any function of the same name.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::EngineError` if the engine refuses the registration.
    pub fn create_function<F>(&mut self, name: &str, func: F) -> Result<(), SqlWorkerError>
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + 'static,
    {
        let slot = CallbackSlot::scalar(name, func, self.engine.clone())?;
        self.install(name, slot)
    }

    /// Register an aggregate function, replacing any function of the same name.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::EngineError` if the engine refuses the registration.
    pub fn create_aggregate<A>(&mut self, name: &str, aggregate: A) -> Result<(), SqlWorkerError>
    where
        A: Aggregate + 'static,
    {
        let slot = CallbackSlot::aggregate(name, aggregate, self.engine.clone())?;
        self.install(name, slot)
    }

    fn install(&mut self, name: &str, slot: CallbackSlot) -> Result<(), SqlWorkerError> {
        let db = self.db()?;
        // Registering over the same name replaces the engine entry in one call, so the
        // previous slot stays alive until the engine has stopped pointing at it.
        let rc = slot.install(db);
        if rc != raw::SQLITE_OK {
            return Err(SqlWorkerError::EngineError {
                message: format!("could not register function {name}: {}", db.errmsg()),
                sql: None,
            });
        }
        if self.functions.insert(name.to_string(), slot).is_some() {
            debug!(name, "replaced host function");
        }
        Ok(())
    }

    /// Unregister a host function. Returns false if no such function was registered.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` if the session is closed and
    /// `SqlWorkerError::EngineError` if the engine refuses, e.g. while a statement using the
    /// function is still active. The function stays registered in that case.
    pub fn remove_function(&mut self, name: &str) -> Result<bool, SqlWorkerError> {
        let db = self.db()?;
        let Some(slot) = self.functions.get(name) else {
            return Ok(false);
        };
        if slot.uninstall(db) != raw::SQLITE_OK {
            return Err(SqlWorkerError::EngineError {
                message: format!("could not remove function {name}: {}", db.errmsg()),
                sql: None,
            });
        }
        self.functions.remove(name);
        Ok(true)
    }

    /// Names of the registered host functions.
    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Aggregate groups of `name` still holding an accumulator.
    #[must_use]
    pub fn open_aggregate_groups(&self, name: &str) -> usize {
        self.functions.get(name).map_or(0, CallbackSlot::open_groups)
    }

    fn finalize_all(&mut self) {
        let handles = self.statements.drain();
        if handles.is_empty() {
            return;
        }
        debug!(count = handles.len(), "finalizing open statements");
        for handle in handles {
            if let Err(err) = handle.finalize(&self.engine) {
                warn!(error = %err, "statement finalize failed");
            }
        }
    }

    fn close_connection(&mut self) -> Result<(), SqlWorkerError> {
        self.finalize_all();
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| SqlWorkerError::SqliteError(err))?;
        }
        Ok(())
    }

    /// Snapshot the database file.
    ///
    /// Open statements are finalized and the connection is closed and reopened so the file
    /// on disk is complete; registered functions are installed again on the new connection.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::HandleClosed` if the session is closed, or the I/O or engine
    /// error that interrupted the close/read/reopen cycle.
    pub fn export(&mut self) -> Result<Vec<u8>, SqlWorkerError> {
        self.db()?;
        self.close_connection()?;
        let bytes = std::fs::read(&self.path);
        let conn = Connection::open(&self.path)?;
        let db = RawDb::of(&conn).ok_or_else(SqlWorkerError::database_closed)?;
        for (name, slot) in &self.functions {
            if slot.install(db) != raw::SQLITE_OK {
                warn!(name = %name, "could not reinstall host function after export");
            }
        }
        self.conn = Some(conn);
        let bytes = bytes?;
        info!(bytes = bytes.len(), "database exported");
        Ok(bytes)
    }

    /// Finalize every statement, drop the host functions and close the connection.
    /// Closing a closed session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::SqliteError` if the engine refuses to close.
    pub fn close(&mut self) -> Result<(), SqlWorkerError> {
        if self.conn.is_none() {
            return Ok(());
        }
        let closed = self.close_connection();
        self.functions.clear();
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %err, "could not remove database file");
        }
        info!(path = %self.path.display(), "session closed");
        closed
    }
}

impl Drop for DatabaseSession {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "session close on drop failed");
        }
    }
}

impl std::fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSession")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("statements", &self.statements.len())
            .field("functions", &self.function_names())
            .finish()
    }
}
