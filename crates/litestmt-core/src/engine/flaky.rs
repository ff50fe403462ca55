//! Fault-injecting wrapper used by unit tests to simulate lock contention.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use super::{
    ColumnType, Compiled, Engine, EngineConnection, EngineError, EngineStatement, OpenTarget,
    SqliteEngine, Step,
};
use crate::value::Value;

/// Shared counters for a [`FlakyEngine`].
#[derive(Debug, Default)]
pub(crate) struct Faults {
    busy: Cell<u32>,
    steps: Cell<u32>,
}

impl Faults {
    /// The next `n` steps on any statement report busy.
    pub(crate) fn inject_busy(&self, n: u32) {
        self.busy.set(n);
    }

    /// Busy signals still pending.
    pub(crate) fn pending_busy(&self) -> u32 {
        self.busy.get()
    }

    /// Total step attempts seen, including failed ones.
    pub(crate) fn steps(&self) -> u32 {
        self.steps.get()
    }
}

/// SQLite with scripted busy signals.
#[derive(Debug, Default)]
pub(crate) struct FlakyEngine {
    faults: Rc<Faults>,
}

impl FlakyEngine {
    pub(crate) fn new() -> (Self, Rc<Faults>) {
        let faults = Rc::new(Faults::default());
        (
            Self {
                faults: Rc::clone(&faults),
            },
            faults,
        )
    }
}

impl Engine for FlakyEngine {
    fn open(&self, target: OpenTarget<'_>) -> Result<Box<dyn EngineConnection>, EngineError> {
        Ok(Box::new(FlakyConnection {
            inner: SqliteEngine.open(target)?,
            faults: Rc::clone(&self.faults),
        }))
    }

    fn version(&self) -> String {
        SqliteEngine.version()
    }
}

struct FlakyConnection {
    inner: Box<dyn EngineConnection>,
    faults: Rc<Faults>,
}

impl EngineConnection for FlakyConnection {
    fn prepare(&self, sql: &str) -> Result<Compiled, EngineError> {
        let Compiled { statement, tail } = self.inner.prepare(sql)?;
        let statement = statement.map(|inner| {
            Box::new(FlakyStatement {
                inner,
                faults: Rc::clone(&self.faults),
            }) as Box<dyn EngineStatement>
        });
        Ok(Compiled { statement, tail })
    }

    fn set_busy_timeout(&self, timeout: Duration) -> Result<(), EngineError> {
        self.inner.set_busy_timeout(timeout)
    }

    fn changes(&self) -> u64 {
        self.inner.changes()
    }

    fn total_changes(&self) -> u64 {
        self.inner.total_changes()
    }

    fn last_insert_rowid(&self) -> i64 {
        self.inner.last_insert_rowid()
    }

    fn is_autocommit(&self) -> bool {
        self.inner.is_autocommit()
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.inner.close()
    }
}

struct FlakyStatement {
    inner: Box<dyn EngineStatement>,
    faults: Rc<Faults>,
}

impl EngineStatement for FlakyStatement {
    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_name(&self, index: usize) -> Option<String> {
        self.inner.column_name(index)
    }

    fn bind(&mut self, position: usize, value: &Value) -> Result<(), EngineError> {
        self.inner.bind(position, value)
    }

    fn clear_bindings(&mut self) {
        self.inner.clear_bindings();
    }

    fn step(&mut self) -> Result<Step, EngineError> {
        self.faults.steps.set(self.faults.steps.get() + 1);
        let pending = self.faults.busy.get();
        if pending > 0 {
            self.faults.busy.set(pending - 1);
            return Err(EngineError::busy());
        }
        self.inner.step()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn column_type(&self, index: usize) -> ColumnType {
        self.inner.column_type(index)
    }

    fn column_i64(&self, index: usize) -> i64 {
        self.inner.column_i64(index)
    }

    fn column_f64(&self, index: usize) -> f64 {
        self.inner.column_f64(index)
    }

    fn column_text(&self, index: usize) -> String {
        self.inner.column_text(index)
    }

    fn column_blob(&self, index: usize) -> Vec<u8> {
        self.inner.column_blob(index)
    }
}
