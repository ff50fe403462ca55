//! Error types for connections, statements and cursors.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Comprehensive error type for all database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Operation attempted before `open()` or after `close()`
    #[error("Database is not open")]
    NotOpen,
    /// The SQL text could not be compiled
    #[error("Failed to compile '{sql}': {source}")]
    Compile {
        sql: String,
        #[source]
        source: EngineError,
    },
    /// Wrong number of arguments for the statement's placeholders
    #[error("Statement expects {expected} parameter(s), got {actual}")]
    ParameterMismatch { expected: usize, actual: usize },
    /// A boundary value has no bindable representation
    #[error("Cannot bind a value of kind '{kind}'")]
    UnsupportedValue { kind: String },
    /// The engine kept reporting busy until the retry budget ran out
    #[error("Database is busy (gave up after {attempts} attempt(s))")]
    Busy { attempts: u32 },
    /// A by-name column lookup did not resolve
    #[error("No such column: {name}")]
    ColumnNotFound { name: String },
    /// A column index outside the result set
    #[error("Column index {index} out of range (statement has {count} column(s))")]
    ColumnIndexOutOfRange { index: usize, count: usize },
    /// A cursor accessor was used outside a valid row
    #[error("Cursor misuse: {reason}")]
    CursorMisuse { reason: &'static str },
    /// The statement was closed explicitly
    #[error("Statement is closed")]
    StatementClosed,
    /// A cursor was requested from a statement without result columns
    #[error("Statement does not return rows: {sql}")]
    NotAQuery { sql: String },
    /// Begin inside a transaction, or commit/rollback outside one
    #[error("Transaction state error: {reason}")]
    TransactionState { reason: &'static str },
    /// Column text that does not match the requested date layout
    #[error("Invalid date '{value}', expected {format}")]
    InvalidDate { value: String, format: &'static str },
    /// Any other engine failure
    #[error("Database error: {message}")]
    Engine {
        message: String,
        #[source]
        source: EngineError,
    },
    /// File system operation errors
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// XDG directory specification errors
    #[error("XDG directory error: {0}")]
    XdgDirectory(String),
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Builder for creating engine errors with optional context.
pub struct EngineErrorBuilder {
    message: String,
}

impl EngineErrorBuilder {
    /// Create a new engine error builder with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build the error with the given source.
    pub fn with_source(self, source: EngineError) -> DatabaseError {
        DatabaseError::Engine {
            message: self.message,
            source,
        }
    }
}

impl DatabaseError {
    /// Creates a builder for engine errors.
    pub fn engine(message: impl Into<String>) -> EngineErrorBuilder {
        EngineErrorBuilder::new(message)
    }

    /// Creates a file system error for `path`.
    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Returns the engine error underneath, if this error came from the engine.
    pub fn engine_source(&self) -> Option<&EngineError> {
        match self {
            Self::Compile { source, .. } | Self::Engine { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True when the error is a busy/locked condition.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
            || self.engine_source().is_some_and(EngineError::is_busy)
    }
}

/// Extension trait for Result to provide concise error mapping with
/// anyhow-style context.
pub trait ResultExt<T, E> {
    /// Add context to any error type, converting to DatabaseError.
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

/// Specialized extension trait for engine-related Results.
pub trait EngineResultExt<T> {
    /// Map engine errors with a message.
    fn engine_context(self, message: &str) -> Result<T>;

    /// Map engine errors raised while compiling `sql`.
    fn compile_context(self, sql: &str) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| DatabaseError::Configuration {
            message: format!("{}: {}", context, e),
        })
    }
}

impl<T> EngineResultExt<T> for std::result::Result<T, EngineError> {
    fn engine_context(self, message: &str) -> Result<T> {
        self.map_err(|e| DatabaseError::engine(message).with_source(e))
    }

    fn compile_context(self, sql: &str) -> Result<T> {
        self.map_err(|source| DatabaseError::Compile {
            sql: sql.to_string(),
            source,
        })
    }
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
