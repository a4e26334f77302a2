use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::warn;

use crate::engine::Engine;
use crate::error::SqlWorkerError;
use crate::sqlite::DatabaseSession;

use super::channel::{BoxedCallback, Command};
use super::dispatcher::run_protocol_worker;
use super::protocol::{Request, Response};

/// Stream of responses for one request; it closes after the terminal response.
pub type ResponseStream = tokio_mpsc::UnboundedReceiver<Response>;

static NEXT_WORKER: AtomicU64 = AtomicU64::new(1);

pub(super) struct ProtocolWorker {
    sender: Sender<Command>,
    worker_id: u64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolWorker {
    pub(super) fn spawn(engine: Engine) -> Result<Self, SqlWorkerError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let worker_id = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
        let thread = thread::Builder::new()
            .name(format!("sql-worker-{worker_id}"))
            .spawn(move || run_protocol_worker(engine, &receiver))
            .map_err(|err| {
                SqlWorkerError::ConnectionError(format!(
                    "failed to spawn protocol worker thread: {err}"
                ))
            })?;

        Ok(Self {
            sender,
            worker_id,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(super) fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub(super) fn send_command(&self, command: Command) -> Result<(), SqlWorkerError> {
        self.sender
            .send(command)
            .map_err(|_| connection_error("protocol worker closed"))
    }

    pub(super) fn post(&self, request: Request) -> Result<ResponseStream, SqlWorkerError> {
        let (respond_to, stream) = tokio_mpsc::unbounded_channel();
        self.send_command(Command::Request {
            request,
            respond_to,
        })?;
        Ok(stream)
    }

    pub(super) fn post_raw(&self, message: String) -> Result<ResponseStream, SqlWorkerError> {
        let (respond_to, stream) = tokio_mpsc::unbounded_channel();
        self.send_command(Command::RawMessage {
            message,
            respond_to,
        })?;
        Ok(stream)
    }

    pub(super) async fn with_session<F, R>(&self, func: F) -> Result<R, SqlWorkerError>
    where
        F: FnOnce(&mut DatabaseSession) -> Result<R, SqlWorkerError> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let callback: BoxedCallback = Box::new(move |session| {
            func(session).map(|value| Box::new(value) as Box<dyn std::any::Any + Send>)
        });
        self.send_command(Command::WithSession {
            callback,
            respond_to: tx,
        })?;
        match rx.await {
            Ok(Ok(payload)) => payload.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
                SqlWorkerError::ConnectionError("protocol worker response downcast failure".into())
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(connection_error(
                "protocol worker dropped while handling session callback",
            )),
        }
    }
}

impl ProtocolWorker {
    /// Stop the thread and wait until it has closed its session.
    pub(super) fn shutdown(&self) -> Result<(), SqlWorkerError> {
        let _ = self.sender.send(Command::Shutdown);
        let handle = self
            .thread
            .lock()
            .map_err(|_| connection_error("protocol worker handle mutex poisoned"))?
            .take();
        match handle {
            Some(handle) => handle.join().map_err(|_| {
                warn!(worker_id = self.worker_id, "protocol worker panicked");
                connection_error("protocol worker panicked")
            }),
            None => Ok(()),
        }
    }
}

impl Drop for ProtocolWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

pub(super) fn connection_error(message: &str) -> SqlWorkerError {
    SqlWorkerError::ConnectionError(message.into())
}
