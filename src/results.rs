// Result containers produced by sessions and streamed by the worker protocol

pub mod result_set;
pub mod row;

pub use result_set::QueryResult;
pub use row::RowObject;
