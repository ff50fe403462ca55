//! Prepared statements: binding, execution with busy retry, and reset.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use log::{debug, trace};
use rusqlite::ffi;

use crate::connection::{Shared, StatementSlot, Trace};
use crate::engine::{Compiled, EngineError, EngineStatement, Step};
use crate::error::{DatabaseError, EngineResultExt, Result};
use crate::value::Value;

mod cursor;


pub use cursor::{ColumnRef, ResultCursor};

use cursor::Holder;

/// What a single execution produced.
#[derive(Debug)]
pub enum Execution<'s> {
    /// The statement ran to completion without producing rows.
    Completed {
        /// Rows changed, as reported by the engine
        changes: u64,
    },
    /// The statement produces rows; the cursor sits before the first one.
    Rows(ResultCursor<'s>),
}

impl<'s> Execution<'s> {
    /// The cursor, if the execution produced one.
    pub fn into_rows(self) -> Option<ResultCursor<'s>> {
        match self {
            Execution::Rows(cursor) => Some(cursor),
            Execution::Completed { .. } => None,
        }
    }
}

/// Column name lookup: exact match first, then ASCII case-insensitive.
#[derive(Debug)]
struct ColumnMap {
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl ColumnMap {
    fn new(names: &[String]) -> Self {
        let mut exact = HashMap::with_capacity(names.len());
        let mut folded = HashMap::with_capacity(names.len());
        // The first column wins when a name repeats.
        for (index, name) in names.iter().enumerate() {
            exact.entry(name.clone()).or_insert(index);
            folded.entry(name.to_ascii_lowercase()).or_insert(index);
        }
        Self { exact, folded }
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_ascii_lowercase()))
            .copied()
    }
}

/// One compiled statement, reusable across executions.
///
/// A statement borrows nothing from its [`Connection`](crate::Connection).
/// Once the connection closes, every operation fails with
/// [`DatabaseError::NotOpen`].
pub struct PreparedStatement {
    sql: String,
    connection: Weak<Shared>,
    slot: Rc<StatementSlot>,
    column_names: Vec<String>,
    parameter_count: usize,
    column_map: OnceCell<ColumnMap>,
    hit_count: u64,
    stepped: bool,
    closed: bool,
}

impl PreparedStatement {
    /// Compiles `sql`, which must hold exactly one statement.
    pub(crate) fn prepare(shared: &Rc<Shared>, sql: &str) -> Result<Self> {
        shared.clear_error();
        let (statement, tail) = Self::compile_first(shared, sql)?;
        let Some(statement) = statement else {
            return Err(DatabaseError::Compile {
                sql: sql.to_string(),
                source: EngineError::new(ffi::SQLITE_MISUSE, "no statement in SQL text"),
            });
        };

        let mut rest = sql.get(tail..).unwrap_or_default();
        while !rest.trim().is_empty() {
            let (next, tail) = Self::compile_first(shared, rest)?;
            if next.is_some() {
                return Err(DatabaseError::Compile {
                    sql: sql.to_string(),
                    source: EngineError::new(
                        ffi::SQLITE_ERROR,
                        "more than one statement; use execute_script",
                    ),
                });
            }
            if tail == 0 {
                break;
            }
            rest = rest.get(tail..).unwrap_or_default();
        }
        Ok(statement)
    }

    /// Compiles the first statement of `sql`. Also returns the byte offset
    /// where the remaining text starts.
    pub(crate) fn compile_first(shared: &Rc<Shared>, sql: &str) -> Result<(Option<Self>, usize)> {
        let Compiled { statement, tail } = shared
            .with_handle(|handle| handle.prepare(sql))?
            .map_err(|err| {
                shared.record("prepare", &err);
                err
            })
            .compile_context(sql)?;

        let Some(statement) = statement else {
            return Ok((None, tail));
        };
        let text = sql.get(..tail).unwrap_or(sql).trim();
        Ok((Some(Self::from_engine(shared, text, statement)), tail))
    }

    fn from_engine(shared: &Rc<Shared>, sql: &str, statement: Box<dyn EngineStatement>) -> Self {
        let column_names = (0..statement.column_count())
            .map(|index| statement.column_name(index).unwrap_or_default())
            .collect();
        let parameter_count = statement.parameter_count();

        let slot = Rc::new(RefCell::new(Some(statement)));
        shared.register(&slot);
        if shared.policy().trace.contains(Trace::LIFECYCLE) {
            debug!("[{}] prepared: {}", shared.name(), sql);
        }

        Self {
            sql: sql.to_string(),
            connection: Rc::downgrade(shared),
            slot,
            column_names,
            parameter_count,
            column_map: OnceCell::new(),
            hit_count: 0,
            stepped: false,
            closed: false,
        }
    }

    /// The SQL text this statement was compiled from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.column_names.get(index).map(String::as_str)
    }

    /// Index of the column called `name`, or `None`.
    ///
    /// An exact match wins over a case-insensitive one. The lookup table is
    /// built on first use and kept for the life of the statement.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_map
            .get_or_init(|| ColumnMap::new(&self.column_names))
            .get(name)
    }

    /// Number of executions attempted so far.
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Binds `args` to the placeholders in order.
    ///
    /// A statement that has already run is rewound first. If the engine
    /// rejects any value, every binding is cleared.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::ParameterMismatch`, before touching the
    /// engine, when `args` does not match the placeholder count.
    pub fn bind(&mut self, args: &[Value]) -> Result<()> {
        if self.closed {
            return Err(DatabaseError::StatementClosed);
        }
        if args.len() != self.parameter_count {
            return Err(DatabaseError::ParameterMismatch {
                expected: self.parameter_count,
                actual: args.len(),
            });
        }

        let shared = self.shared()?;
        let rewind = self.stepped;
        let outcome = self.with_engine(|engine| {
            if rewind {
                engine.reset();
            }
            for (index, value) in args.iter().enumerate() {
                if let Err(err) = engine.bind(index + 1, value) {
                    engine.clear_bindings();
                    return Err(err);
                }
            }
            Ok(())
        })?;
        self.stepped = false;

        outcome.map_err(|err| {
            shared.record(&self.sql, &err);
            DatabaseError::engine(format!("Failed to bind parameters of '{}'", self.sql))
                .with_source(err)
        })
    }

    /// Runs the statement with its current bindings.
    ///
    /// The first step happens here. A statement that yields a row or
    /// declares result columns gives [`Execution::Rows`]; anything else
    /// gives [`Execution::Completed`].
    pub fn execute(&mut self) -> Result<Execution<'_>> {
        self.hit_count += 1;
        let before = self.total_changes()?;
        let first = self.start()?;
        if first == Step::Row || !self.column_names.is_empty() {
            return Ok(Execution::Rows(ResultCursor::new(Holder::Borrowed(self), first)));
        }

        let changes = self.changes_since(before)?;
        self.rewind();
        Ok(Execution::Completed { changes })
    }

    /// Binds `args`, then executes.
    pub fn execute_with(&mut self, args: &[Value]) -> Result<Execution<'_>> {
        if let Err(err) = self.bind(args) {
            self.hit_count += 1;
            return Err(err);
        }
        self.execute()
    }

    /// Runs a query and returns a cursor before the first row.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotAQuery`, without stepping, when the
    /// statement has no result columns.
    pub fn select(&mut self) -> Result<ResultCursor<'_>> {
        let first = self.begin_select()?;
        Ok(ResultCursor::new(Holder::Borrowed(self), first))
    }

    /// Binds `args`, then selects.
    pub fn select_with(&mut self, args: &[Value]) -> Result<ResultCursor<'_>> {
        if let Err(err) = self.bind(args) {
            self.hit_count += 1;
            return Err(err);
        }
        self.select()
    }

    /// Executes to completion, discarding any rows, and returns the number
    /// of changed rows.
    pub fn run(&mut self) -> Result<u64> {
        let before = self.total_changes()?;
        if let Execution::Rows(mut cursor) = self.execute()? {
            while cursor.next()? {}
        }
        self.changes_since(before)
    }

    /// Binds `args`, then runs to completion.
    pub fn run_with(&mut self, args: &[Value]) -> Result<u64> {
        if let Err(err) = self.bind(args) {
            self.hit_count += 1;
            return Err(err);
        }
        self.run()
    }

    /// Rewinds the statement and clears its bindings, keeping the compiled
    /// form.
    pub fn reset(&mut self) -> Result<()> {
        self.with_engine(|engine| {
            engine.reset();
            engine.clear_bindings();
        })?;
        self.stepped = false;
        Ok(())
    }

    /// Finalizes the statement. Closing twice does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(mut slot) = self.slot.try_borrow_mut() {
            slot.take();
        }
        if let Some(shared) = self.connection.upgrade() {
            if shared.policy().trace.contains(Trace::LIFECYCLE) {
                debug!("[{}] finalized: {}", shared.name(), self.sql);
            }
        }
    }

    /// Owned cursor for one-shot queries.
    pub(crate) fn into_cursor(mut self, args: &[Value]) -> Result<ResultCursor<'static>> {
        self.bind(args)?;
        let first = self.begin_select()?;
        Ok(ResultCursor::new(Holder::Owned(self), first))
    }

    /// Advances one step, retrying busy signals in place.
    ///
    /// The retry budget is read from the connection at every attempt, so a
    /// change made while a statement is live applies to its next step.
    pub(crate) fn step(&mut self) -> Result<Step> {
        let shared = self.shared()?;
        let mut busy = 0u32;
        loop {
            let outcome = self.with_engine(|engine| engine.step())?;
            self.stepped = true;
            match outcome {
                Ok(step) => {
                    if busy > 0 {
                        trace!(
                            "[{}] step succeeded after {} busy signal(s)",
                            shared.name(),
                            busy
                        );
                    }
                    return Ok(step);
                }
                Err(err) if err.is_busy() => {
                    busy += 1;
                    let limit = shared.policy().busy_retries;
                    if busy >= limit {
                        shared.record(&self.sql, &err);
                        return Err(DatabaseError::Busy { attempts: busy });
                    }
                    trace!("[{}] busy ({}/{}): {}", shared.name(), busy, limit, self.sql);
                }
                Err(err) => {
                    shared.record(&self.sql, &err);
                    return Err(DatabaseError::engine(format!("Failed to execute '{}'", self.sql))
                        .with_source(err));
                }
            }
        }
    }

    /// Puts a stepped statement back at its start, keeping bindings.
    pub(crate) fn rewind(&mut self) {
        if self.stepped && self.with_engine(|engine| engine.reset()).is_ok() {
            self.stepped = false;
        }
    }

    /// Runs `f` against the compiled statement.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&dyn EngineStatement) -> T) -> Result<T> {
        if self.closed {
            return Err(DatabaseError::StatementClosed);
        }
        let slot = self.slot.borrow();
        let engine = slot.as_deref().ok_or(DatabaseError::NotOpen)?;
        Ok(f(engine))
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut dyn EngineStatement) -> T) -> Result<T> {
        if self.closed {
            return Err(DatabaseError::StatementClosed);
        }
        let mut slot = self.slot.borrow_mut();
        let engine = slot.as_deref_mut().ok_or(DatabaseError::NotOpen)?;
        Ok(f(engine))
    }

    fn shared(&self) -> Result<Rc<Shared>> {
        if self.closed {
            return Err(DatabaseError::StatementClosed);
        }
        self.connection.upgrade().ok_or(DatabaseError::NotOpen)
    }

    fn begin_select(&mut self) -> Result<Step> {
        self.hit_count += 1;
        if self.closed {
            return Err(DatabaseError::StatementClosed);
        }
        if self.column_names.is_empty() {
            return Err(DatabaseError::NotAQuery {
                sql: self.sql.clone(),
            });
        }
        self.start()
    }

    /// Rewinds if needed and takes the first step.
    fn total_changes(&self) -> Result<u64> {
        self.shared()?.with_handle(|handle| handle.total_changes())
    }

    /// Rows changed by this statement's last run. The engine's per-statement
    /// counter keeps the previous write's value across DDL and queries, so it
    /// only counts when the running total moved since `before`.
    fn changes_since(&self, before: u64) -> Result<u64> {
        self.shared()?.with_handle(|handle| {
            if handle.total_changes() == before {
                0
            } else {
                handle.changes()
            }
        })
    }

    fn start(&mut self) -> Result<Step> {
        let shared = self.shared()?;
        shared.clear_error();
        if shared.policy().trace.contains(Trace::QUERIES) {
            debug!(
                "[{}] run #{}: {}",
                shared.name(),
                self.hit_count,
                self.sql
            );
        }
        if self.stepped {
            self.with_engine(|engine| engine.reset())?;
            self.stepped = false;
        }
        self.step()
    }
}

impl fmt::Display for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [hits: {}]", self.sql, self.hit_count)
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.sql)
            .field("parameter_count", &self.parameter_count)
            .field("column_names", &self.column_names)
            .field("hit_count", &self.hit_count)
            .field("closed", &self.closed)
            .finish()
    }
}
