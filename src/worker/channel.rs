use std::any::Any;

use tokio::sync::{mpsc, oneshot};

use crate::error::SqlWorkerError;
use crate::sqlite::DatabaseSession;

use super::protocol::{Request, Response};

pub(super) type BoxedResponse = Result<Box<dyn Any + Send>, SqlWorkerError>;
pub(super) type BoxedCallback =
    Box<dyn FnOnce(&mut DatabaseSession) -> BoxedResponse + Send>;

pub(super) enum Command {
    Request {
        request: Request,
        respond_to: mpsc::UnboundedSender<Response>,
    },
    RawMessage {
        message: String,
        respond_to: mpsc::UnboundedSender<Response>,
    },
    WithSession {
        callback: BoxedCallback,
        respond_to: oneshot::Sender<BoxedResponse>,
    },
    Shutdown,
}
