use std::fmt;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{FunctionError, SqlWorkerError};
use crate::sqlite::{Aggregate, DatabaseSession};
use crate::types::Value;

use super::manager::{ProtocolWorker, ResponseStream, connection_error};
use super::protocol::{Request, Response};

/// Protocol instance running on a dedicated worker thread.
///
/// Requests are processed one at a time in the order they were posted. Each request gets its
/// own [`ResponseStream`] carrying any streamed rows followed by the terminal response.
/// Clones share the same worker; the thread shuts down once the last clone is dropped.
#[derive(Clone)]
pub struct SqlWorker {
    worker: Arc<ProtocolWorker>,
}

impl SqlWorker {
    /// Start a worker thread owning a fresh protocol instance.
    ///
    /// # Errors
    /// Returns [`SqlWorkerError::ConnectionError`] if the thread cannot be spawned.
    pub fn spawn(engine: &Engine) -> Result<Self, SqlWorkerError> {
        let worker = ProtocolWorker::spawn(engine.clone())?;
        Ok(Self {
            worker: Arc::new(worker),
        })
    }

    /// Queue a request and return its response stream.
    ///
    /// # Errors
    /// Returns [`SqlWorkerError::ConnectionError`] if the worker has stopped.
    pub fn post(&self, request: Request) -> Result<ResponseStream, SqlWorkerError> {
        self.worker.post(request)
    }

    /// Queue a raw JSON message. Malformed messages are answered on the stream with an error
    /// response rather than failing here.
    ///
    /// # Errors
    /// Returns [`SqlWorkerError::ConnectionError`] if the worker has stopped.
    pub fn post_json(&self, message: impl Into<String>) -> Result<ResponseStream, SqlWorkerError> {
        self.worker.post_raw(message.into())
    }

    /// Post a request and wait for all of its responses.
    ///
    /// # Errors
    /// Returns [`SqlWorkerError::ConnectionError`] if the worker stops before answering.
    /// Request failures are not errors here; they arrive as [`Response::Error`].
    pub async fn call(&self, request: Request) -> Result<Vec<Response>, SqlWorkerError> {
        collect(self.post(request)?).await
    }

    /// [`SqlWorker::call`] for a raw JSON message.
    ///
    /// # Errors
    /// As for [`SqlWorker::call`].
    pub async fn call_json(
        &self,
        message: impl Into<String>,
    ) -> Result<Vec<Response>, SqlWorkerError> {
        collect(self.post_json(message)?).await
    }

    /// Run synchronous logic against the worker-owned session, opening an empty session first
    /// if none is open.
    ///
    /// # Errors
    /// Propagates the callback's error, or [`SqlWorkerError::ConnectionError`] if the worker
    /// is gone.
    pub async fn with_session<F, R>(&self, func: F) -> Result<R, SqlWorkerError>
    where
        F: FnOnce(&mut DatabaseSession) -> Result<R, SqlWorkerError> + Send + 'static,
        R: Send + 'static,
    {
        self.worker.with_session(func).await
    }

    /// Register a scalar function on the worker-owned session.
    ///
    /// # Errors
    /// As for [`DatabaseSession::create_function`].
    pub async fn create_function<F>(&self, name: &str, func: F) -> Result<(), SqlWorkerError>
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + 'static,
    {
        let name = name.to_string();
        self.with_session(move |session| session.create_function(&name, func))
            .await
    }

    /// Register an aggregate function on the worker-owned session.
    ///
    /// # Errors
    /// As for [`DatabaseSession::create_aggregate`].
    pub async fn create_aggregate<A>(&self, name: &str, aggregate: A) -> Result<(), SqlWorkerError>
    where
        A: Aggregate + Send + 'static,
    {
        let name = name.to_string();
        self.with_session(move |session| session.create_aggregate(&name, aggregate))
            .await
    }

    /// Stop the worker thread and wait for it to close its session.
    ///
    /// Other clones stay valid handles, but every later request fails with
    /// [`SqlWorkerError::ConnectionError`].
    ///
    /// # Errors
    /// Returns [`SqlWorkerError::ConnectionError`] if the worker thread panicked.
    pub fn shutdown(self) -> Result<(), SqlWorkerError> {
        self.worker.shutdown()
    }
}

async fn collect(mut stream: ResponseStream) -> Result<Vec<Response>, SqlWorkerError> {
    let mut responses = Vec::new();
    while let Some(response) = stream.recv().await {
        let terminal = response.is_terminal();
        responses.push(response);
        if terminal {
            return Ok(responses);
        }
    }
    Err(connection_error("protocol worker dropped request"))
}

impl fmt::Debug for SqlWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlWorker")
            .field("worker_id", &self.worker.worker_id())
            .finish()
    }
}
