//! The embedded engine seen through its C-style primitives.
//!
//! The statement layer never talks to SQLite directly. It goes through three
//! traits that mirror the engine's own API surface:
//!
//! ```text
//! Engine ──open──▶ EngineConnection ──prepare──▶ EngineStatement
//!                   changes, rowid,                bind, step, reset,
//!                   autocommit, close              column_*, finalize (drop)
//! ```
//!
//! [`SqliteEngine`] is the production implementation. Tests wrap it to inject
//! busy signals.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use rusqlite::{ffi, ErrorCode, OpenFlags};
use thiserror::Error;

use crate::value::Value;

#[cfg(test)]
pub(crate) mod flaky;
mod sqlite;

pub use sqlite::SqliteEngine;

/// Error reported by the engine, with its result codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {extended_code})")]
pub struct EngineError {
    /// Primary result code
    pub code: ErrorCode,
    /// Extended result code as returned by the engine
    pub extended_code: i32,
    /// Engine-supplied message
    pub message: String,
}

impl EngineError {
    /// Builds an error from a raw result code and a message.
    pub fn new(result_code: i32, message: impl Into<String>) -> Self {
        Self {
            code: ffi::Error::new(result_code).code,
            extended_code: result_code,
            message: message.into(),
        }
    }

    /// The engine's transient contention signal.
    pub fn busy() -> Self {
        Self::new(ffi::SQLITE_BUSY, "database is locked")
    }

    /// True for the busy and locked conditions that are worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => Self {
                code: failure.code,
                extended_code: failure.extended_code,
                message: message.unwrap_or_else(|| failure.to_string()),
            },
            other => Self::new(ffi::SQLITE_ERROR, other.to_string()),
        }
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A result row is available.
    Row,
    /// The statement has run to completion.
    Done,
}

/// Storage class of a column in the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Null => "null",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
            ColumnType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// What to open.
#[derive(Debug, Clone, Copy)]
pub enum OpenTarget<'a> {
    /// A database file with explicit open flags.
    File { path: &'a Path, flags: OpenFlags },
    /// A private transient store.
    Memory,
}

/// Result of compiling the first statement of a SQL text.
pub struct Compiled {
    /// `None` when the text holds only whitespace or comments.
    pub statement: Option<Box<dyn EngineStatement>>,
    /// Byte offset in the input where the next statement starts.
    pub tail: usize,
}

/// Factory for engine connections.
pub trait Engine {
    /// Opens a connection to `target`.
    fn open(&self, target: OpenTarget<'_>) -> Result<Box<dyn EngineConnection>, EngineError>;

    /// Version string of the engine library.
    fn version(&self) -> String;
}

/// An open engine handle.
///
/// Statements compiled from a handle must be dropped before the handle is
/// closed. [`crate::Connection`] enforces this.
pub trait EngineConnection {
    /// Compiles the first statement in `sql`.
    fn prepare(&self, sql: &str) -> Result<Compiled, EngineError>;

    /// Sets how long the engine itself waits on a lock before reporting busy.
    fn set_busy_timeout(&self, timeout: Duration) -> Result<(), EngineError>;

    /// Rows modified by the most recent write.
    fn changes(&self) -> u64;

    /// Rows modified since the handle was opened, triggers included.
    fn total_changes(&self) -> u64;

    /// Row id of the most recent successful insert.
    fn last_insert_rowid(&self) -> i64;

    /// True when no explicit transaction is open.
    fn is_autocommit(&self) -> bool;

    /// Closes the handle.
    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// A compiled statement. Dropping it finalizes the engine handle.
pub trait EngineStatement {
    /// Number of parameter placeholders.
    fn parameter_count(&self) -> usize;

    /// Number of result columns.
    fn column_count(&self) -> usize;

    /// Declared name of a result column.
    fn column_name(&self, index: usize) -> Option<String>;

    /// Binds `value` to the 1-based `position`.
    fn bind(&mut self, position: usize, value: &Value) -> Result<(), EngineError>;

    /// Resets every parameter to NULL.
    fn clear_bindings(&mut self);

    /// Advances the statement by one step.
    fn step(&mut self) -> Result<Step, EngineError>;

    /// Rewinds the statement so it can run again. Bindings are kept.
    fn reset(&mut self);

    /// Storage class of a column in the current row.
    fn column_type(&self, index: usize) -> ColumnType;

    /// Column coerced to an integer.
    fn column_i64(&self, index: usize) -> i64;

    /// Column coerced to a double.
    fn column_f64(&self, index: usize) -> f64;

    /// Column coerced to text; NULL is empty.
    fn column_text(&self, index: usize) -> String;

    /// Column coerced to bytes; NULL is empty.
    fn column_blob(&self, index: usize) -> Vec<u8>;
}
