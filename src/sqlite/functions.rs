#![allow(unsafe_code)]
//! Host functions callable from SQL.
//!
//! Each registered function is a boxed slot owned by the session's function table. The engine
//! receives the slot's address as its user-data pointer and calls back into one of the
//! trampolines below, which decode the arguments, run the host code under `catch_unwind` and
//! report either the encoded result or a result error.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};

use rusqlite::ffi;

use crate::engine::Engine;
use crate::error::{FunctionError, SqlWorkerError};
use crate::types::Value;

use super::marshal::{arg_value, set_result};
use super::raw::{self, RawContext, RawDb};

/// Signature of a scalar host function.
pub type ScalarFunction = dyn Fn(&[Value]) -> Result<Value, FunctionError>;

/// A user-defined aggregate.
///
/// `init` seeds the accumulator of each group, `step` folds one row into it and `finalize`
/// turns it into the group's result. Accumulators never leak from one group into the next.
pub trait Aggregate {
    type State: 'static;

    fn init(&self) -> Self::State;

    /// # Errors
    ///
    /// A failure discards this group's accumulator and aborts the query with the message.
    fn step(&self, state: Self::State, args: &[Value]) -> Result<Self::State, FunctionError>;

    /// # Errors
    ///
    /// A failure becomes the query error for this group.
    fn finalize(&self, state: Self::State) -> Result<Value, FunctionError>;
}

/// Aggregate assembled from three closures.
pub struct AggregateFns<I, S, F> {
    pub init: I,
    pub step: S,
    pub finalize: F,
}

/// Build an [`Aggregate`] from closures.
///
/// ```rust
/// use sql_worker::prelude::*;
///
/// let sum_of_squares = aggregate(
///     || 0_i64,
///     |acc, args: &[Value]| Ok(acc + args[0].as_int().unwrap_or(0).pow(2)),
///     |acc| Ok(Value::Integer(acc)),
/// );
/// # let _ = sum_of_squares;
/// ```
pub fn aggregate<St, I, S, F>(init: I, step: S, finalize: F) -> AggregateFns<I, S, F>
where
    I: Fn() -> St,
    S: Fn(St, &[Value]) -> Result<St, FunctionError>,
    F: Fn(St) -> Result<Value, FunctionError>,
{
    AggregateFns {
        init,
        step,
        finalize,
    }
}

impl<St, I, S, F> Aggregate for AggregateFns<I, S, F>
where
    St: 'static,
    I: Fn() -> St,
    S: Fn(St, &[Value]) -> Result<St, FunctionError>,
    F: Fn(St) -> Result<Value, FunctionError>,
{
    type State = St;

    fn init(&self) -> St {
        (self.init)()
    }

    fn step(&self, state: St, args: &[Value]) -> Result<St, FunctionError> {
        (self.step)(state, args)
    }

    fn finalize(&self, state: St) -> Result<Value, FunctionError> {
        (self.finalize)(state)
    }
}

struct ScalarSlot {
    func: Box<ScalarFunction>,
    engine: Engine,
}

struct AggregateSlot<A: Aggregate> {
    aggregate: A,
    /// Accumulators keyed by the engine's per-group context address.
    groups: RefCell<HashMap<usize, A::State>>,
    engine: Engine,
}

trait InstallAggregate {
    fn install(&self, db: RawDb, name: &CStr) -> c_int;
    fn open_groups(&self) -> usize;
}

impl<A> InstallAggregate for AggregateSlot<A>
where
    A: Aggregate + 'static,
{
    fn install(&self, db: RawDb, name: &CStr) -> c_int {
        let user_data = std::ptr::from_ref(self).cast_mut().cast::<c_void>();
        db.create_function(
            name,
            user_data,
            None,
            Some(aggregate_step::<A>),
            Some(aggregate_final::<A>),
        )
    }

    fn open_groups(&self) -> usize {
        self.groups.borrow().len()
    }
}

enum SlotKind {
    Scalar(Box<ScalarSlot>),
    Aggregate(Box<dyn InstallAggregate>),
}

/// Entry of a session's function table.
pub(crate) struct CallbackSlot {
    name: CString,
    kind: SlotKind,
}

impl CallbackSlot {
    pub(crate) fn scalar<F>(name: &str, func: F, engine: Engine) -> Result<Self, SqlWorkerError>
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + 'static,
    {
        Ok(Self {
            name: function_name(name)?,
            kind: SlotKind::Scalar(Box::new(ScalarSlot {
                func: Box::new(func),
                engine,
            })),
        })
    }

    pub(crate) fn aggregate<A>(
        name: &str,
        aggregate: A,
        engine: Engine,
    ) -> Result<Self, SqlWorkerError>
    where
        A: Aggregate + 'static,
    {
        Ok(Self {
            name: function_name(name)?,
            kind: SlotKind::Aggregate(Box::new(AggregateSlot {
                aggregate,
                groups: RefCell::new(HashMap::new()),
                engine,
            })),
        })
    }

    /// Register this slot's trampoline with the connection.
    pub(crate) fn install(&self, db: RawDb) -> c_int {
        match &self.kind {
            SlotKind::Scalar(slot) => {
                let user_data = std::ptr::from_ref::<ScalarSlot>(slot.as_ref())
                    .cast_mut()
                    .cast::<c_void>();
                db.create_function(&self.name, user_data, Some(scalar_trampoline), None, None)
            }
            SlotKind::Aggregate(slot) => slot.install(db, &self.name),
        }
    }

    /// Detach the trampoline so the engine no longer holds this slot's address.
    pub(crate) fn uninstall(&self, db: RawDb) -> c_int {
        db.remove_function(&self.name)
    }

    /// Aggregate groups currently holding an accumulator (always 0 for scalars).
    pub(crate) fn open_groups(&self) -> usize {
        match &self.kind {
            SlotKind::Scalar(_) => 0,
            SlotKind::Aggregate(slot) => slot.open_groups(),
        }
    }
}

fn function_name(name: &str) -> Result<CString, SqlWorkerError> {
    CString::new(name).map_err(|_| SqlWorkerError::EngineError {
        message: format!("invalid function name {name:?}"),
        sql: None,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "host function panicked".to_string()
    }
}

fn settle<T>(outcome: std::thread::Result<Result<T, FunctionError>>) -> Result<T, FunctionError> {
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(FunctionError(panic_message(payload.as_ref()))),
    }
}

fn deliver(ctx: &RawContext, engine: &Engine, result: Result<Value, FunctionError>) {
    match result {
        Ok(value) => set_result(ctx, &value, engine),
        Err(err) => ctx.result_error(&err.0),
    }
}

unsafe extern "C" fn scalar_trampoline(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let Some(ctx) = (unsafe { RawContext::from_ptr(ctx) }) else {
        return;
    };
    // SAFETY: installed with the address of a boxed ScalarSlot that outlives the registration.
    let slot = unsafe { &*ctx.user_data().cast::<ScalarSlot>() };
    let args: Vec<Value> = unsafe { raw::callback_args(argc, argv) }
        .iter()
        .map(arg_value)
        .collect();
    let outcome = catch_unwind(AssertUnwindSafe(|| (slot.func)(&args)));
    deliver(&ctx, &slot.engine, settle(outcome));
}

unsafe extern "C" fn aggregate_step<A>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) where
    A: Aggregate + 'static,
{
    let Some(ctx) = (unsafe { RawContext::from_ptr(ctx) }) else {
        return;
    };
    // SAFETY: installed with the address of a boxed AggregateSlot<A>.
    let slot = unsafe { &*ctx.user_data().cast::<AggregateSlot<A>>() };
    let Some(identity) = ctx.aggregate_identity() else {
        ctx.result_error_nomem();
        return;
    };
    let args: Vec<Value> = unsafe { raw::callback_args(argc, argv) }
        .iter()
        .map(arg_value)
        .collect();

    let state = slot.groups.borrow_mut().remove(&identity);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let state = state.unwrap_or_else(|| slot.aggregate.init());
        slot.aggregate.step(state, &args)
    }));
    match settle(outcome) {
        Ok(next) => {
            slot.groups.borrow_mut().insert(identity, next);
        }
        Err(err) => ctx.result_error(&err.0),
    }
}

unsafe extern "C" fn aggregate_final<A>(ctx: *mut ffi::sqlite3_context)
where
    A: Aggregate + 'static,
{
    let Some(ctx) = (unsafe { RawContext::from_ptr(ctx) }) else {
        return;
    };
    // SAFETY: installed with the address of a boxed AggregateSlot<A>.
    let slot = unsafe { &*ctx.user_data().cast::<AggregateSlot<A>>() };
    let Some(identity) = ctx.aggregate_identity() else {
        ctx.result_error_nomem();
        return;
    };

    let state = slot.groups.borrow_mut().remove(&identity);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let state = state.unwrap_or_else(|| slot.aggregate.init());
        slot.aggregate.finalize(state)
    }));
    deliver(&ctx, &slot.engine, settle(outcome));
}
