use std::sync::mpsc::Receiver;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::engine::Engine;

use super::channel::{BoxedCallback, BoxedResponse, Command};
use super::handler::ProtocolHandler;
use super::protocol::Response;

pub(super) fn run_protocol_worker(engine: Engine, receiver: &Receiver<Command>) {
    let mut protocol = ProtocolHandler::new(engine);
    info!("protocol worker started");

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Shutdown => break,
            Command::Request {
                request,
                respond_to,
            } => {
                protocol.handle(&request, &mut forward(&respond_to));
            }
            Command::RawMessage {
                message,
                respond_to,
            } => {
                protocol.handle_json(&message, &mut forward(&respond_to));
            }
            Command::WithSession {
                callback,
                respond_to,
            } => {
                let _ = respond_to.send(run_session_callback(&mut protocol, callback));
            }
        }
    }

    // dropping the handler closes the session
    drop(protocol);
    info!("protocol worker stopped");
}

/// Send responses to the requester; a requester that went away just stops listening.
fn forward(respond_to: &UnboundedSender<Response>) -> impl FnMut(Response) + '_ {
    move |response| {
        if respond_to.send(response).is_err() {
            debug!("response receiver dropped");
        }
    }
}

fn run_session_callback(protocol: &mut ProtocolHandler, callback: BoxedCallback) -> BoxedResponse {
    callback(protocol.ensure_session()?)
}
