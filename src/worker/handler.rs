use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::SqlWorkerError;
use crate::sqlite::DatabaseSession;

use super::protocol::{Action, Request, Response};

/// Synchronous protocol state: one engine handle and at most one open session.
///
/// Every request is processed to completion before `handle` returns, so responses come out in
/// request order and an `each` stream is never interleaved with anything else.
///
/// ```rust
/// use serde_json::json;
/// use sql_worker::prelude::*;
///
/// # fn main() -> Result<(), SqlWorkerError> {
/// let mut protocol = ProtocolHandler::new(Engine::new()?);
/// let responses = protocol.handle_collect(&Request::exec(1, "SELECT 2 AS two"));
/// assert_eq!(
///     serde_json::to_value(&responses[0])?,
///     json!({"id": 1, "results": [{"columns": ["two"], "values": [[2]]}]})
/// );
/// # Ok(())
/// # }
/// ```
pub struct ProtocolHandler {
    engine: Engine,
    db: Option<DatabaseSession>,
}

impl ProtocolHandler {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self { engine, db: None }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn session(&self) -> Option<&DatabaseSession> {
        self.db.as_ref()
    }

    /// The open session, opening an empty one first if there is none.
    ///
    /// # Errors
    ///
    /// See [`DatabaseSession::open`].
    pub fn ensure_session(&mut self) -> Result<&mut DatabaseSession, SqlWorkerError> {
        if self.db.is_none() {
            debug!("no open session, opening an empty one");
            self.db = Some(DatabaseSession::open(&self.engine, None)?);
        }
        self.db.as_mut().ok_or_else(SqlWorkerError::database_closed)
    }

    /// Process one request, passing every response to `emit`. The last response is always
    /// terminal.
    pub fn handle(&mut self, request: &Request, emit: &mut dyn FnMut(Response)) {
        let id = request.id.clone();
        let action = request.action.as_deref().unwrap_or_default();
        debug!(id = %id, action, "dispatching request");
        let outcome = request
            .command()
            .and_then(|command| self.dispatch(&id, command, emit));
        match outcome {
            Ok(response) => emit(response),
            Err(err) => {
                warn!(id = %id, action, error = %err, "request failed");
                emit(Response::failure(id, &err));
            }
        }
    }

    /// [`ProtocolHandler::handle`], collecting the responses.
    pub fn handle_collect(&mut self, request: &Request) -> Vec<Response> {
        let mut responses = Vec::new();
        self.handle(request, &mut |response| responses.push(response));
        responses
    }

    /// Process one raw JSON message. A message that is not a valid request is answered with an
    /// error carrying whatever `id` could be recovered.
    pub fn handle_json(&mut self, message: &str, emit: &mut dyn FnMut(Response)) {
        match parse_request(message) {
            Ok(request) => self.handle(&request, emit),
            Err((id, err)) => {
                warn!(id = %id, error = %err, "malformed message");
                emit(Response::failure(id, &err));
            }
        }
    }

    fn dispatch(
        &mut self,
        id: &JsonValue,
        command: Action,
        emit: &mut dyn FnMut(Response),
    ) -> Result<Response, SqlWorkerError> {
        match command {
            Action::Open { buffer } => {
                if let Some(mut previous) = self.db.take() {
                    if let Err(err) = previous.close() {
                        warn!(error = %err, "closing previous session failed");
                    }
                }
                self.db = Some(DatabaseSession::open(&self.engine, buffer.as_deref())?);
                Ok(Response::Ready {
                    id: id.clone(),
                    ready: true,
                })
            }
            Action::Exec {
                sql,
                params,
                config,
            } => {
                let results = self.ensure_session()?.exec(&sql, params.as_ref(), config)?;
                Ok(Response::Results {
                    id: id.clone(),
                    results,
                })
            }
            Action::Each {
                sql,
                params,
                config,
            } => {
                let rows = self
                    .ensure_session()?
                    .each(&sql, params.as_ref(), config, |row| {
                        emit(Response::Row {
                            id: id.clone(),
                            row,
                            finished: false,
                        });
                    })?;
                debug!(id = %id, rows, "each finished");
                Ok(Response::Finished {
                    id: id.clone(),
                    finished: true,
                })
            }
            Action::Export => {
                let db = self
                    .db
                    .as_mut()
                    .ok_or_else(SqlWorkerError::database_closed)?;
                Ok(Response::Buffer {
                    id: id.clone(),
                    buffer: db.export()?,
                })
            }
            Action::Close => {
                if let Some(mut db) = self.db.take() {
                    db.close()?;
                }
                Ok(Response::Closed { id: id.clone() })
            }
        }
    }
}

fn parse_request(message: &str) -> Result<Request, (JsonValue, SqlWorkerError)> {
    let value: JsonValue = serde_json::from_str(message)
        .map_err(|err| (JsonValue::Null, SqlWorkerError::from(err)))?;
    let id = value.get("id").cloned().unwrap_or(JsonValue::Null);
    Request::deserialize(value).map_err(|err| (id, SqlWorkerError::from(err)))
}

impl std::fmt::Debug for ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("engine", &self.engine)
            .field("db", &self.db)
            .finish()
    }
}
