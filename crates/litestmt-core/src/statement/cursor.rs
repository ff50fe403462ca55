//! Forward-only iteration over the rows of an executing statement.

use std::fmt;
use std::ops::{Deref, DerefMut};

use jiff::{civil::Date, Timestamp};

use super::PreparedStatement;
use crate::date::{timestamp_from_epoch_seconds, DateFormat};
use crate::engine::{ColumnType, EngineStatement, Step};
use crate::error::{DatabaseError, Result};
use crate::value::Value;

/// A column addressed by position or by name.
pub trait ColumnRef {
    /// Resolves to a column index of `statement`.
    fn resolve(&self, statement: &PreparedStatement) -> Result<usize>;
}

impl ColumnRef for usize {
    fn resolve(&self, statement: &PreparedStatement) -> Result<usize> {
        let count = statement.column_count();
        if *self < count {
            Ok(*self)
        } else {
            Err(DatabaseError::ColumnIndexOutOfRange {
                index: *self,
                count,
            })
        }
    }
}

impl ColumnRef for str {
    fn resolve(&self, statement: &PreparedStatement) -> Result<usize> {
        statement
            .column_index(self)
            .ok_or_else(|| DatabaseError::ColumnNotFound {
                name: self.to_string(),
            })
    }
}

impl ColumnRef for String {
    fn resolve(&self, statement: &PreparedStatement) -> Result<usize> {
        self.as_str().resolve(statement)
    }
}

impl<T: ColumnRef + ?Sized> ColumnRef for &T {
    fn resolve(&self, statement: &PreparedStatement) -> Result<usize> {
        (**self).resolve(statement)
    }
}

pub(super) enum Holder<'s> {
    Borrowed(&'s mut PreparedStatement),
    Owned(PreparedStatement),
}

impl Deref for Holder<'_> {
    type Target = PreparedStatement;

    fn deref(&self) -> &PreparedStatement {
        match self {
            Holder::Borrowed(statement) => statement,
            Holder::Owned(statement) => statement,
        }
    }
}

impl DerefMut for Holder<'_> {
    fn deref_mut(&mut self) -> &mut PreparedStatement {
        match self {
            Holder::Borrowed(statement) => statement,
            Holder::Owned(statement) => statement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    BeforeFirst { row_ready: bool },
    OnRow,
    /// The last step gave up on a busy signal; `next` retries it.
    Interrupted,
    Exhausted,
}

/// Rows of one execution, read one at a time.
///
/// Column accessors are valid only after [`next`](ResultCursor::next) has
/// returned `true`. NULL reads as 0, `false`, an empty string or an empty
/// blob; use [`is_null`](ResultCursor::is_null) to tell it apart, or
/// [`value`](ResultCursor::value) for the storage class as stored.
///
/// ```no_run
/// # fn example(connection: &litestmt_core::Connection) -> litestmt_core::Result<()> {
/// let mut cursor = connection.select("SELECT id, title FROM book WHERE year > ?1", &[1990.into()])?;
/// while cursor.next()? {
///     println!("{} {}", cursor.int64("id")?, cursor.text("title")?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResultCursor<'s> {
    statement: Holder<'s>,
    state: CursorState,
}

impl<'s> ResultCursor<'s> {
    pub(super) fn new(statement: Holder<'s>, first: Step) -> Self {
        Self {
            statement,
            state: CursorState::BeforeFirst {
                row_ready: first == Step::Row,
            },
        }
    }

    /// Moves to the next row. Returns `false` once the rows run out, and on
    /// every call after that.
    ///
    /// A busy error leaves the position intact; calling `next` again retries
    /// the same step.
    pub fn next(&mut self) -> Result<bool> {
        match self.state {
            CursorState::BeforeFirst { row_ready: true } => {
                self.state = CursorState::OnRow;
                Ok(true)
            }
            CursorState::BeforeFirst { row_ready: false } | CursorState::Exhausted => {
                self.finish();
                Ok(false)
            }
            CursorState::OnRow | CursorState::Interrupted => match self.statement.step() {
                Ok(Step::Row) => {
                    self.state = CursorState::OnRow;
                    Ok(true)
                }
                Ok(Step::Done) => {
                    self.finish();
                    Ok(false)
                }
                Err(err @ DatabaseError::Busy { .. }) => {
                    self.state = CursorState::Interrupted;
                    Err(err)
                }
                Err(err) => {
                    self.finish();
                    Err(err)
                }
            },
        }
    }

    /// True while positioned on a row.
    pub fn has_row(&self) -> bool {
        self.state == CursorState::OnRow
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Marks the cursor exhausted and releases the statement: a borrowed
    /// statement is rewound, the statement of a one-shot select is
    /// finalized. Closing twice does nothing.
    pub fn close(&mut self) {
        self.finish();
    }

    /// The statement being iterated.
    pub fn statement(&self) -> &PreparedStatement {
        &self.statement
    }

    pub fn column_count(&self) -> usize {
        self.statement.column_count()
    }

    pub fn column_names(&self) -> &[String] {
        self.statement.column_names()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.statement.column_index(name)
    }

    pub fn int<C: ColumnRef>(&self, column: C) -> Result<i32> {
        // Truncates like the engine's own 32-bit accessor.
        self.read(column, |engine, index| engine.column_i64(index) as i32)
    }

    pub fn int64<C: ColumnRef>(&self, column: C) -> Result<i64> {
        self.read(column, |engine, index| engine.column_i64(index))
    }

    /// Nonzero integers are `true`.
    pub fn bool<C: ColumnRef>(&self, column: C) -> Result<bool> {
        self.read(column, |engine, index| engine.column_i64(index) != 0)
    }

    pub fn float<C: ColumnRef>(&self, column: C) -> Result<f32> {
        self.read(column, |engine, index| engine.column_f64(index) as f32)
    }

    pub fn double<C: ColumnRef>(&self, column: C) -> Result<f64> {
        self.read(column, |engine, index| engine.column_f64(index))
    }

    pub fn text<C: ColumnRef>(&self, column: C) -> Result<String> {
        self.read(column, |engine, index| engine.column_text(index))
    }

    pub fn blob<C: ColumnRef>(&self, column: C) -> Result<Vec<u8>> {
        self.read(column, |engine, index| engine.column_blob(index))
    }

    pub fn is_null<C: ColumnRef>(&self, column: C) -> Result<bool> {
        self.read(column, |engine, index| {
            engine.column_type(index) == ColumnType::Null
        })
    }

    /// Column with its stored storage class.
    pub fn value<C: ColumnRef>(&self, column: C) -> Result<Value> {
        self.read(column, |engine, index| read_value(engine, index))
    }

    /// Every column of the current row, in order.
    pub fn values(&self) -> Result<Vec<Value>> {
        self.check_row()?;
        self.statement.read(|engine| {
            (0..self.statement.column_count())
                .map(|index| read_value(engine, index))
                .collect()
        })
    }

    /// Seconds since the Unix epoch, fractional seconds kept. NULL is
    /// `None`.
    pub fn timestamp<C: ColumnRef>(&self, column: C) -> Result<Option<Timestamp>> {
        let seconds = self.read(column, |engine, index| {
            (engine.column_type(index) != ColumnType::Null).then(|| engine.column_f64(index))
        })?;
        seconds.map(timestamp_from_epoch_seconds).transpose()
    }

    /// Date stored as text in `format`. NULL and blank text are `None`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidDate` when the text does not match the
    /// layout.
    pub fn date<C: ColumnRef>(&self, column: C, format: DateFormat) -> Result<Option<Date>> {
        let text = self.read(column, |engine, index| {
            (engine.column_type(index) != ColumnType::Null).then(|| engine.column_text(index))
        })?;
        match text {
            Some(text) if !text.trim().is_empty() => format.parse(&text).map(Some),
            _ => Ok(None),
        }
    }

    fn check_row(&self) -> Result<()> {
        let reason = match self.state {
            CursorState::OnRow => return Ok(()),
            CursorState::BeforeFirst { .. } => "no current row; call next() first",
            CursorState::Interrupted => "the row was lost to a busy error; call next() to retry",
            CursorState::Exhausted => "the cursor is exhausted",
        };
        Err(DatabaseError::CursorMisuse { reason })
    }

    fn read<C, T>(&self, column: C, f: impl FnOnce(&dyn EngineStatement, usize) -> T) -> Result<T>
    where
        C: ColumnRef,
    {
        self.check_row()?;
        let index = column.resolve(&self.statement)?;
        self.statement.read(|engine| f(engine, index))
    }

    /// Borrowed statements are rewound for reuse; an owned one is finalized.
    fn finish(&mut self) {
        self.state = CursorState::Exhausted;
        match &mut self.statement {
            Holder::Borrowed(statement) => statement.rewind(),
            Holder::Owned(statement) => statement.close(),
        }
    }
}

impl Drop for ResultCursor<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for ResultCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("sql", &self.statement.sql())
            .field("state", &self.state)
            .finish()
    }
}

fn read_value(engine: &dyn EngineStatement, index: usize) -> Value {
    match engine.column_type(index) {
        ColumnType::Null => Value::Null,
        ColumnType::Integer => Value::Integer(engine.column_i64(index)),
        ColumnType::Real => Value::Real(engine.column_f64(index)),
        ColumnType::Text => Value::Text(engine.column_text(index)),
        ColumnType::Blob => Value::Blob(engine.column_blob(index)),
    }
}
