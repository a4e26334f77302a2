#![allow(unsafe_code)]
//! Foreign-call boundary to the SQLite C API.
//!
//! Everything that touches a raw engine pointer lives here. Pointers are wrapped in small
//! non-`Send` owner types; `RawStatement` is valid from a successful prepare until
//! `finalize` consumes it, and the session guarantees every statement is finalized before its
//! connection closes.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr::{self, NonNull};

use rusqlite::ffi;

pub(crate) const SQLITE_OK: c_int = ffi::SQLITE_OK;
pub(crate) const SQLITE_ROW: c_int = ffi::SQLITE_ROW;
pub(crate) const SQLITE_DONE: c_int = ffi::SQLITE_DONE;

pub(crate) const TYPE_INTEGER: c_int = ffi::SQLITE_INTEGER;
pub(crate) const TYPE_FLOAT: c_int = ffi::SQLITE_FLOAT;
pub(crate) const TYPE_TEXT: c_int = ffi::SQLITE_TEXT;
pub(crate) const TYPE_BLOB: c_int = ffi::SQLITE_BLOB;

pub(crate) type ScalarCallback =
    unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value);
pub(crate) type FinalCallback = unsafe extern "C" fn(*mut ffi::sqlite3_context);

/// One-time library initialization; repeated calls are harmless.
pub(crate) fn initialize_library() -> c_int {
    unsafe { ffi::sqlite3_initialize() }
}

/// English text for a result code.
pub(crate) fn error_string(rc: c_int) -> String {
    unsafe { cstr_to_string(ffi::sqlite3_errstr(rc)) }
}

unsafe fn cstr_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

unsafe fn copy_bytes(ptr: *const u8, len: c_int) -> Vec<u8> {
    let len = usize::try_from(len).unwrap_or(0);
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
}

fn byte_len(bytes: &[u8]) -> Option<c_int> {
    c_int::try_from(bytes.len()).ok()
}

/// Connection pointer borrowed from a `rusqlite::Connection`.
#[derive(Clone, Copy)]
pub(crate) struct RawDb(NonNull<ffi::sqlite3>);

/// Result of compiling the first statement found at an offset of a SQL text.
pub(crate) struct Prepared {
    pub(crate) rc: c_int,
    pub(crate) stmt: Option<RawStatement>,
    /// Byte offset of the first character after the compiled statement.
    pub(crate) tail: usize,
}

impl RawDb {
    pub(crate) fn of(conn: &rusqlite::Connection) -> Option<Self> {
        NonNull::new(unsafe { conn.handle() }).map(RawDb)
    }

    fn ptr(self) -> *mut ffi::sqlite3 {
        self.0.as_ptr()
    }

    /// Connection-level error message for the most recent failed call.
    pub(crate) fn errmsg(self) -> String {
        unsafe { cstr_to_string(ffi::sqlite3_errmsg(self.ptr())) }
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    pub(crate) fn changes(self) -> u64 {
        u64::try_from(unsafe { ffi::sqlite3_changes(self.ptr()) }).unwrap_or(0)
    }

    /// Compile the statement starting at byte `offset` of `sql`.
    pub(crate) fn prepare(self, sql: &str, offset: usize) -> Prepared {
        let rest = sql.as_bytes().get(offset..).unwrap_or_default();
        let Some(len) = byte_len(rest) else {
            return Prepared {
                rc: ffi::SQLITE_TOOBIG,
                stmt: None,
                tail: offset,
            };
        };
        let base = rest.as_ptr().cast::<c_char>();
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        let rc = unsafe { ffi::sqlite3_prepare_v2(self.ptr(), base, len, &mut stmt, &mut tail) };
        let consumed = if tail.is_null() {
            rest.len()
        } else {
            (tail as usize).saturating_sub(base as usize).min(rest.len())
        };
        Prepared {
            rc,
            stmt: NonNull::new(stmt).map(RawStatement),
            tail: offset + consumed,
        }
    }

    /// Install (or replace) a variadic UTF-8 function.
    pub(crate) fn create_function(
        self,
        name: &CStr,
        user_data: *mut c_void,
        x_func: Option<ScalarCallback>,
        x_step: Option<ScalarCallback>,
        x_final: Option<FinalCallback>,
    ) -> c_int {
        unsafe {
            ffi::sqlite3_create_function_v2(
                self.ptr(),
                name.as_ptr(),
                -1,
                ffi::SQLITE_UTF8,
                user_data,
                x_func,
                x_step,
                x_final,
                None,
            )
        }
    }

    /// Remove a function installed with [`RawDb::create_function`].
    pub(crate) fn remove_function(self, name: &CStr) -> c_int {
        self.create_function(name, ptr::null_mut(), None, None, None)
    }
}

/// Owned prepared-statement pointer.
pub(crate) struct RawStatement(NonNull<ffi::sqlite3_stmt>);

impl RawStatement {
    fn ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.0.as_ptr()
    }

    pub(crate) fn step(&self) -> c_int {
        unsafe { ffi::sqlite3_step(self.ptr()) }
    }

    pub(crate) fn reset(&self) -> c_int {
        unsafe { ffi::sqlite3_reset(self.ptr()) }
    }

    pub(crate) fn clear_bindings(&self) -> c_int {
        unsafe { ffi::sqlite3_clear_bindings(self.ptr()) }
    }

    pub(crate) fn finalize(self) -> c_int {
        unsafe { ffi::sqlite3_finalize(self.ptr()) }
    }

    pub(crate) fn bind_null(&self, index: c_int) -> c_int {
        unsafe { ffi::sqlite3_bind_null(self.ptr(), index) }
    }

    pub(crate) fn bind_int(&self, index: c_int, value: i32) -> c_int {
        unsafe { ffi::sqlite3_bind_int(self.ptr(), index, value) }
    }

    pub(crate) fn bind_int64(&self, index: c_int, value: i64) -> c_int {
        unsafe { ffi::sqlite3_bind_int64(self.ptr(), index, value) }
    }

    pub(crate) fn bind_double(&self, index: c_int, value: f64) -> c_int {
        unsafe { ffi::sqlite3_bind_double(self.ptr(), index, value) }
    }

    /// Bind UTF-8 text with an explicit byte count; the engine takes a private copy.
    pub(crate) fn bind_text(&self, index: c_int, bytes: &[u8]) -> c_int {
        let Some(len) = byte_len(bytes) else {
            return ffi::SQLITE_TOOBIG;
        };
        unsafe {
            ffi::sqlite3_bind_text(
                self.ptr(),
                index,
                bytes.as_ptr().cast::<c_char>(),
                len,
                ffi::SQLITE_TRANSIENT(),
            )
        }
    }

    /// Bind raw bytes; an empty slice binds a zero-length blob, not NULL.
    pub(crate) fn bind_blob(&self, index: c_int, bytes: &[u8]) -> c_int {
        if bytes.is_empty() {
            return unsafe { ffi::sqlite3_bind_zeroblob(self.ptr(), index, 0) };
        }
        let Some(len) = byte_len(bytes) else {
            return ffi::SQLITE_TOOBIG;
        };
        unsafe {
            ffi::sqlite3_bind_blob(
                self.ptr(),
                index,
                bytes.as_ptr().cast::<c_void>(),
                len,
                ffi::SQLITE_TRANSIENT(),
            )
        }
    }

    /// 1-based index of a named parameter, 0 when the statement has no such name.
    pub(crate) fn parameter_index(&self, name: &str) -> c_int {
        let Ok(name) = CString::new(name) else {
            return 0;
        };
        unsafe { ffi::sqlite3_bind_parameter_index(self.ptr(), name.as_ptr()) }
    }

    pub(crate) fn column_count(&self) -> c_int {
        unsafe { ffi::sqlite3_column_count(self.ptr()) }
    }

    pub(crate) fn column_type(&self, index: c_int) -> c_int {
        unsafe { ffi::sqlite3_column_type(self.ptr(), index) }
    }

    pub(crate) fn column_int64(&self, index: c_int) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.ptr(), index) }
    }

    pub(crate) fn column_double(&self, index: c_int) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.ptr(), index) }
    }

    pub(crate) fn column_text(&self, index: c_int) -> Vec<u8> {
        unsafe {
            let text = ffi::sqlite3_column_text(self.ptr(), index);
            let len = ffi::sqlite3_column_bytes(self.ptr(), index);
            copy_bytes(text, len)
        }
    }

    pub(crate) fn column_blob(&self, index: c_int) -> Vec<u8> {
        unsafe {
            let blob = ffi::sqlite3_column_blob(self.ptr(), index);
            let len = ffi::sqlite3_column_bytes(self.ptr(), index);
            copy_bytes(blob.cast::<u8>(), len)
        }
    }

    pub(crate) fn column_name(&self, index: c_int) -> String {
        unsafe { cstr_to_string(ffi::sqlite3_column_name(self.ptr(), index)) }
    }

    pub(crate) fn sql(&self) -> Option<String> {
        let text = unsafe { ffi::sqlite3_sql(self.ptr()) };
        (!text.is_null()).then(|| unsafe { cstr_to_string(text) })
    }
}

/// Function-call context handed to a trampoline.
pub(crate) struct RawContext(NonNull<ffi::sqlite3_context>);

impl RawContext {
    /// # Safety
    ///
    /// `ctx` must be the context pointer the engine passed to the current callback.
    pub(crate) unsafe fn from_ptr(ctx: *mut ffi::sqlite3_context) -> Option<Self> {
        NonNull::new(ctx).map(RawContext)
    }

    fn ptr(&self) -> *mut ffi::sqlite3_context {
        self.0.as_ptr()
    }

    pub(crate) fn user_data(&self) -> *mut c_void {
        unsafe { ffi::sqlite3_user_data(self.ptr()) }
    }

    /// Address of the engine's per-group scratch memory, stable for the life of one group.
    pub(crate) fn aggregate_identity(&self) -> Option<usize> {
        let slot = unsafe { ffi::sqlite3_aggregate_context(self.ptr(), 1) };
        (!slot.is_null()).then_some(slot as usize)
    }

    pub(crate) fn result_null(&self) {
        unsafe { ffi::sqlite3_result_null(self.ptr()) }
    }

    pub(crate) fn result_int(&self, value: i32) {
        unsafe { ffi::sqlite3_result_int(self.ptr(), value) }
    }

    pub(crate) fn result_int64(&self, value: i64) {
        unsafe { ffi::sqlite3_result_int64(self.ptr(), value) }
    }

    pub(crate) fn result_double(&self, value: f64) {
        unsafe { ffi::sqlite3_result_double(self.ptr(), value) }
    }

    pub(crate) fn result_text(&self, bytes: &[u8]) {
        let Some(len) = byte_len(bytes) else {
            return unsafe { ffi::sqlite3_result_error_toobig(self.ptr()) };
        };
        unsafe {
            ffi::sqlite3_result_text(
                self.ptr(),
                bytes.as_ptr().cast::<c_char>(),
                len,
                ffi::SQLITE_TRANSIENT(),
            );
        }
    }

    pub(crate) fn result_blob(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return unsafe { ffi::sqlite3_result_zeroblob(self.ptr(), 0) };
        }
        let Some(len) = byte_len(bytes) else {
            return unsafe { ffi::sqlite3_result_error_toobig(self.ptr()) };
        };
        unsafe {
            ffi::sqlite3_result_blob(
                self.ptr(),
                bytes.as_ptr().cast::<c_void>(),
                len,
                ffi::SQLITE_TRANSIENT(),
            );
        }
    }

    pub(crate) fn result_error(&self, message: &str) {
        let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
        unsafe { ffi::sqlite3_result_error(self.ptr(), message.as_ptr().cast::<c_char>(), len) }
    }

    pub(crate) fn result_error_nomem(&self) {
        unsafe { ffi::sqlite3_result_error_nomem(self.ptr()) }
    }
}

/// Borrowed callback argument; valid only while the trampoline runs.
pub(crate) struct RawArg(NonNull<ffi::sqlite3_value>);

impl RawArg {
    pub(crate) fn value_type(&self) -> c_int {
        unsafe { ffi::sqlite3_value_type(self.0.as_ptr()) }
    }

    pub(crate) fn int64(&self) -> i64 {
        unsafe { ffi::sqlite3_value_int64(self.0.as_ptr()) }
    }

    pub(crate) fn double(&self) -> f64 {
        unsafe { ffi::sqlite3_value_double(self.0.as_ptr()) }
    }

    pub(crate) fn text(&self) -> Vec<u8> {
        unsafe {
            let text = ffi::sqlite3_value_text(self.0.as_ptr());
            let len = ffi::sqlite3_value_bytes(self.0.as_ptr());
            copy_bytes(text, len)
        }
    }

    pub(crate) fn blob(&self) -> Vec<u8> {
        unsafe {
            let blob = ffi::sqlite3_value_blob(self.0.as_ptr());
            let len = ffi::sqlite3_value_bytes(self.0.as_ptr());
            copy_bytes(blob.cast::<u8>(), len)
        }
    }
}

/// Wrap the argument vector of a callback.
///
/// # Safety
///
/// `argv` must point to `argc` value pointers supplied by the engine for the current call.
pub(crate) unsafe fn callback_args(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Vec<RawArg> {
    let count = usize::try_from(argc).unwrap_or(0);
    if argv.is_null() || count == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(argv, count) }
        .iter()
        .filter_map(|value| NonNull::new(*value).map(RawArg))
        .collect()
}
