// Worker protocol - message-correlated commands against one database session
//
// - protocol: request/response wire types
// - handler: synchronous protocol state machine
// - channel/dispatcher/manager: the dedicated worker thread
// - connection: the public async handle

mod channel;
mod connection;
mod dispatcher;
pub mod handler;
mod manager;
pub mod protocol;

pub use connection::SqlWorker;
pub use handler::ProtocolHandler;
pub use manager::ResponseStream;
pub use protocol::{Action, Request, Response};
