//! SQLite implementation of the engine traits.
//!
//! `rusqlite` owns the database handle (open, close, busy timeout, change
//! counters). Statements go through the raw C API re-exported as
//! `rusqlite::ffi`, because the statement layer needs step-level control:
//! retrying a busy step in place, keeping a cursor open across calls and
//! reading columns with the engine's own coercions.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, CStr};
use std::ptr;
use std::time::Duration;

use rusqlite::{ffi, Connection};

use super::{
    ColumnType, Compiled, Engine, EngineConnection, EngineError, EngineStatement, OpenTarget,
    Step,
};
use crate::value::Value;

/// The bundled SQLite library.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine;

impl Engine for SqliteEngine {
    fn open(&self, target: OpenTarget<'_>) -> Result<Box<dyn EngineConnection>, EngineError> {
        let connection = match target {
            OpenTarget::File { path, flags } => Connection::open_with_flags(path, flags)?,
            OpenTarget::Memory => Connection::open_in_memory()?,
        };
        Ok(Box::new(SqliteConnection { connection }))
    }

    fn version(&self) -> String {
        rusqlite::version().to_string()
    }
}

struct SqliteConnection {
    connection: Connection,
}

impl SqliteConnection {
    fn raw(&self) -> *mut ffi::sqlite3 {
        // SAFETY: the pointer is only used while `self.connection` is alive,
        // and never to close the database behind rusqlite's back.
        unsafe { self.connection.handle() }
    }
}

impl EngineConnection for SqliteConnection {
    fn prepare(&self, sql: &str) -> Result<Compiled, EngineError> {
        let db = self.raw();
        let len = c_int::try_from(sql.len())
            .map_err(|_| EngineError::new(ffi::SQLITE_TOOBIG, "SQL text is too long"))?;

        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        // SAFETY: `db` is open; `sql` outlives the call and `len` bounds the
        // read, so the text does not need a terminating NUL.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db, sql.as_ptr().cast(), len, &mut stmt, &mut tail)
        };
        if rc != ffi::SQLITE_OK {
            // SAFETY: a failed prepare leaves `stmt` NULL or finalizable.
            unsafe { ffi::sqlite3_finalize(stmt) };
            return Err(last_error(db, rc));
        }

        let tail = if tail.is_null() {
            sql.len()
        } else {
            (tail as usize).saturating_sub(sql.as_ptr() as usize)
        };

        let statement = if stmt.is_null() {
            None
        } else {
            Some(Box::new(SqliteStatement::new(stmt)) as Box<dyn EngineStatement>)
        };

        Ok(Compiled { statement, tail })
    }

    fn set_busy_timeout(&self, timeout: Duration) -> Result<(), EngineError> {
        self.connection.busy_timeout(timeout)?;
        Ok(())
    }

    fn changes(&self) -> u64 {
        self.connection.changes()
    }

    fn total_changes(&self) -> u64 {
        self.connection.total_changes()
    }

    fn last_insert_rowid(&self) -> i64 {
        self.connection.last_insert_rowid()
    }

    fn is_autocommit(&self) -> bool {
        self.connection.is_autocommit()
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.connection.close().map_err(|(_, e)| EngineError::from(e))
    }
}

struct SqliteStatement {
    stmt: *mut ffi::sqlite3_stmt,
    column_count: usize,
    parameter_count: usize,
}

impl SqliteStatement {
    fn new(stmt: *mut ffi::sqlite3_stmt) -> Self {
        // SAFETY: `stmt` was just returned by a successful prepare.
        let (columns, parameters) = unsafe {
            (
                ffi::sqlite3_column_count(stmt),
                ffi::sqlite3_bind_parameter_count(stmt),
            )
        };
        Self {
            stmt,
            column_count: usize::try_from(columns).unwrap_or(0),
            parameter_count: usize::try_from(parameters).unwrap_or(0),
        }
    }

    fn column(&self, index: usize) -> Option<c_int> {
        if index < self.column_count {
            c_int::try_from(index).ok()
        } else {
            None
        }
    }

    fn error(&self, rc: c_int) -> EngineError {
        // SAFETY: a live statement always belongs to an open database.
        let db = unsafe { ffi::sqlite3_db_handle(self.stmt) };
        last_error(db, rc)
    }

    fn check(&self, rc: c_int) -> Result<(), EngineError> {
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    fn bytes(&self, col: c_int, data: *const u8) -> Vec<u8> {
        if data.is_null() {
            return Vec::new();
        }
        // SAFETY: the row is current and `data` was returned for `col`;
        // sqlite3_column_bytes must follow the text/blob call.
        unsafe {
            let len = usize::try_from(ffi::sqlite3_column_bytes(self.stmt, col)).unwrap_or(0);
            std::slice::from_raw_parts(data, len).to_vec()
        }
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        // SAFETY: finalized exactly once; the owning Connection drops every
        // statement before closing the database.
        unsafe { ffi::sqlite3_finalize(self.stmt) };
    }
}

impl EngineStatement for SqliteStatement {
    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn column_count(&self) -> usize {
        self.column_count
    }

    fn column_name(&self, index: usize) -> Option<String> {
        let col = self.column(index)?;
        // SAFETY: `col` is in range; the returned string is copied before
        // any other call on the statement.
        unsafe {
            let name = ffi::sqlite3_column_name(self.stmt, col);
            if name.is_null() {
                None
            } else {
                Some(CStr::from_ptr(name).to_string_lossy().into_owned())
            }
        }
    }

    fn bind(&mut self, position: usize, value: &Value) -> Result<(), EngineError> {
        let index = c_int::try_from(position)
            .map_err(|_| EngineError::new(ffi::SQLITE_RANGE, "parameter index out of range"))?;
        let too_big = || EngineError::new(ffi::SQLITE_TOOBIG, "value is too large to bind");

        // SAFETY: the statement is live; text and blob contents are copied
        // by SQLite (SQLITE_TRANSIENT) before the call returns.
        let rc = unsafe {
            match value {
                Value::Null => ffi::sqlite3_bind_null(self.stmt, index),
                Value::Integer(i) => ffi::sqlite3_bind_int64(self.stmt, index, *i),
                Value::Real(r) => ffi::sqlite3_bind_double(self.stmt, index, *r),
                Value::Text(s) => {
                    let len = c_int::try_from(s.len()).map_err(|_| too_big())?;
                    ffi::sqlite3_bind_text(
                        self.stmt,
                        index,
                        s.as_ptr().cast(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    )
                }
                Value::Blob(b) if b.is_empty() => ffi::sqlite3_bind_zeroblob(self.stmt, index, 0),
                Value::Blob(b) => {
                    let len = c_int::try_from(b.len()).map_err(|_| too_big())?;
                    ffi::sqlite3_bind_blob(
                        self.stmt,
                        index,
                        b.as_ptr().cast(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    )
                }
            }
        };
        self.check(rc)
    }

    fn clear_bindings(&mut self) {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_clear_bindings(self.stmt) };
    }

    fn step(&mut self) -> Result<Step, EngineError> {
        // SAFETY: the statement is live.
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        match rc {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            _ => Err(self.error(rc)),
        }
    }

    fn reset(&mut self) {
        // The return code repeats the last step's error, which has already
        // been reported.
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_reset(self.stmt) };
    }

    fn column_type(&self, index: usize) -> ColumnType {
        let Some(col) = self.column(index) else {
            return ColumnType::Null;
        };
        // SAFETY: the statement is live and `col` is in range.
        match unsafe { ffi::sqlite3_column_type(self.stmt, col) } {
            ffi::SQLITE_INTEGER => ColumnType::Integer,
            ffi::SQLITE_FLOAT => ColumnType::Real,
            ffi::SQLITE_TEXT => ColumnType::Text,
            ffi::SQLITE_BLOB => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }

    fn column_i64(&self, index: usize) -> i64 {
        match self.column(index) {
            // SAFETY: the statement is live and `col` is in range.
            Some(col) => unsafe { ffi::sqlite3_column_int64(self.stmt, col) },
            None => 0,
        }
    }

    fn column_f64(&self, index: usize) -> f64 {
        match self.column(index) {
            // SAFETY: the statement is live and `col` is in range.
            Some(col) => unsafe { ffi::sqlite3_column_double(self.stmt, col) },
            None => 0.0,
        }
    }

    fn column_text(&self, index: usize) -> String {
        let Some(col) = self.column(index) else {
            return String::new();
        };
        // SAFETY: the statement is live and `col` is in range.
        let data = unsafe { ffi::sqlite3_column_text(self.stmt, col) };
        String::from_utf8_lossy(&self.bytes(col, data.cast())).into_owned()
    }

    fn column_blob(&self, index: usize) -> Vec<u8> {
        let Some(col) = self.column(index) else {
            return Vec::new();
        };
        // SAFETY: the statement is live and `col` is in range.
        let data = unsafe { ffi::sqlite3_column_blob(self.stmt, col) };
        self.bytes(col, data.cast())
    }
}

fn last_error(db: *mut ffi::sqlite3, rc: c_int) -> EngineError {
    let message = if db.is_null() {
        // SAFETY: sqlite3_errstr returns a static string for any code.
        unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
            .to_string_lossy()
            .into_owned()
    } else {
        // SAFETY: `db` is open; the message is copied immediately.
        unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
            .to_string_lossy()
            .into_owned()
    };
    EngineError::new(rc, message)
}
