//! Value marshaling between [`Value`] and the engine's bind/column/result calls.

use std::ffi::c_int;

use crate::engine::memory::decode_text_lossy;
use crate::engine::{Address, Engine, MemoryBridge};
use crate::error::SqlWorkerError;
use crate::types::{MAX_SAFE_INTEGER, QueryConfig, Value};

use super::raw::{self, RawArg, RawContext, RawStatement};

/// Bind one value at a 1-based parameter index.
///
/// Text and blob bytes are staged in the memory bridge; their addresses are pushed onto
/// `allocations` so the owning statement can release them on reset or finalize. Returns the
/// engine's result code.
///
/// # Errors
///
/// Returns `SqlWorkerError::OutOfMemory` if the bridge cannot stage the bytes.
pub(crate) fn bind_value(
    stmt: &RawStatement,
    index: c_int,
    value: &Value,
    bridge: &mut MemoryBridge,
    allocations: &mut Vec<Address>,
) -> Result<c_int, SqlWorkerError> {
    let rc = match value {
        Value::Null => stmt.bind_null(index),
        Value::Integer(i) => match i32::try_from(*i) {
            Ok(small) => stmt.bind_int(index, small),
            Err(_) => stmt.bind_int64(index, *i),
        },
        Value::Float(f) => stmt.bind_double(index, *f),
        Value::Text(text) => {
            let (address, len) = bridge.allocate_str(text, false)?;
            allocations.push(address);
            bridge.with_bytes(address, len, |bytes| stmt.bind_text(index, bytes))?
        }
        Value::Blob(blob) => {
            let (address, len) = bridge.allocate_bytes(blob)?;
            allocations.push(address);
            bridge.with_bytes(address, len, |bytes| stmt.bind_blob(index, bytes))?
        }
    };
    Ok(rc)
}

/// Integers outside the exactly-representable double range become floats unless the caller
/// asked for extended precision.
#[must_use]
pub fn integer_value(value: i64, config: QueryConfig) -> Value {
    if config.use_big_int || (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        Value::Integer(value)
    } else {
        #[allow(clippy::cast_precision_loss)]
        Value::Float(value as f64)
    }
}

/// Decode the current row's column at `index`, keyed by the type the engine reports.
pub(crate) fn column_value(stmt: &RawStatement, index: c_int, config: QueryConfig) -> Value {
    match stmt.column_type(index) {
        raw::TYPE_INTEGER => integer_value(stmt.column_int64(index), config),
        raw::TYPE_FLOAT => Value::Float(stmt.column_double(index)),
        raw::TYPE_TEXT => Value::Text(decode_text_lossy(&stmt.column_text(index))),
        raw::TYPE_BLOB => Value::Blob(stmt.column_blob(index)),
        _ => Value::Null,
    }
}

/// Decode a callback argument. Host callbacks always see exact integers.
pub(crate) fn arg_value(arg: &RawArg) -> Value {
    match arg.value_type() {
        raw::TYPE_INTEGER => Value::Integer(arg.int64()),
        raw::TYPE_FLOAT => Value::Float(arg.double()),
        raw::TYPE_TEXT => Value::Text(decode_text_lossy(&arg.text())),
        raw::TYPE_BLOB => Value::Blob(arg.blob()),
        _ => Value::Null,
    }
}

/// Hand a callback's return value back to the engine.
///
/// Text and blob results pass through the memory bridge and are released as soon as the
/// engine has copied them.
pub(crate) fn set_result(ctx: &RawContext, value: &Value, engine: &Engine) {
    match value {
        Value::Null => ctx.result_null(),
        Value::Integer(i) => match i32::try_from(*i) {
            Ok(small) => ctx.result_int(small),
            Err(_) => ctx.result_int64(*i),
        },
        Value::Float(f) => ctx.result_double(*f),
        Value::Text(text) => {
            if stage_result(engine, text.as_bytes(), |bytes| ctx.result_text(bytes)).is_err() {
                ctx.result_error_nomem();
            }
        }
        Value::Blob(blob) => {
            if stage_result(engine, blob, |bytes| ctx.result_blob(bytes)).is_err() {
                ctx.result_error_nomem();
            }
        }
    }
}

fn stage_result(
    engine: &Engine,
    bytes: &[u8],
    deliver: impl FnOnce(&[u8]),
) -> Result<(), SqlWorkerError> {
    let mut bridge = engine.memory()?;
    let (address, len) = bridge.allocate_bytes(bytes)?;
    let delivered = bridge.with_bytes(address, len, deliver);
    bridge.free(address);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_integers_stay_integers() {
        let cfg = QueryConfig::default();
        assert_eq!(integer_value(42, cfg), Value::Integer(42));
        assert_eq!(
            integer_value(MAX_SAFE_INTEGER, cfg),
            Value::Integer(MAX_SAFE_INTEGER)
        );
        assert_eq!(
            integer_value(-MAX_SAFE_INTEGER, cfg),
            Value::Integer(-MAX_SAFE_INTEGER)
        );
    }

    #[test]
    fn wide_integers_need_big_int_mode() {
        let wide = i64::MAX;
        assert_eq!(
            integer_value(wide, QueryConfig::default()),
            Value::Float(9_223_372_036_854_775_807_f64)
        );
        assert_eq!(integer_value(wide, QueryConfig::big_int()), Value::Integer(wide));
    }
}
