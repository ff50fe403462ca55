//! Connections, prepared statements and typed cursors over SQLite.
//!
//! This crate wraps the embedded engine in three objects:
//!
//! - [`Connection`]: opens a store in one of four [`OpenMode`]s, runs
//!   transactions and keeps the last engine error.
//! - [`PreparedStatement`]: one compiled query with positional binding, a
//!   hit counter and cached column lookup.
//! - [`ResultCursor`]: forward-only rows with coercing, typed accessors,
//!   including dates stored as text in three layouts ([`DateFormat`]).
//!
//! Every step retries the engine's busy signal up to the connection's
//! current retry budget before failing with [`DatabaseError::Busy`].
//!
//! # Quick Start
//!
//! ```rust
//! use litestmt_core::{ConnectionBuilder, DateFormat, Execution, Value};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut connection = ConnectionBuilder::memory().build()?;
//! connection.open()?;
//!
//! connection.execute_script(
//!     "CREATE TABLE release (name TEXT NOT NULL, day TEXT);
//!      INSERT INTO release VALUES ('first', '2009-09-13');",
//! )?;
//!
//! let mut insert = connection.prepare("INSERT INTO release VALUES (?1, ?2)")?;
//! if let Execution::Completed { changes } =
//!     insert.execute_with(&[Value::from("second"), Value::from("2010-01-05")])?
//! {
//!     assert_eq!(changes, 1);
//! }
//!
//! let mut cursor = connection.select("SELECT name, day FROM release ORDER BY day", &[])?;
//! while cursor.next()? {
//!     let day = cursor.date("day", DateFormat::Dashed)?;
//!     println!("{} {:?}", cursor.text("name")?, day);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod date;
pub mod engine;
pub mod error;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use connection::{
    ColumnInfo, Connection, ConnectionBuilder, LastError, OpenMode, Policy, Trace,
    DEFAULT_BUSY_RETRIES,
};
pub use date::DateFormat;
pub use engine::{EngineError, SqliteEngine};
pub use error::{DatabaseError, Result};
pub use statement::{ColumnRef, Execution, PreparedStatement, ResultCursor};
pub use value::Value;
