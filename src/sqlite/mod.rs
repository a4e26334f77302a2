// SQLite module - sessions, statements and host functions on top of the engine
//
// This module is split into several sub-modules:
// - raw: the only place that touches engine pointers
// - marshal: Value <-> engine argument/result encoding
// - statement: per-statement state machine and staged allocations
// - session: the connection plus its statement arena and function table
// - functions: scalar/aggregate trampolines
// - iter: statement-at-a-time walk over multi-statement SQL

mod arena;
pub mod functions;
pub mod iter;
pub(crate) mod marshal;
pub(crate) mod raw;
pub mod session;
pub mod statement;

// Re-export the public API
pub use functions::{Aggregate, AggregateFns, ScalarFunction, aggregate};
pub use iter::StatementIterator;
pub use marshal::integer_value;
pub use session::DatabaseSession;
pub use statement::{StatementId, StatementState};
