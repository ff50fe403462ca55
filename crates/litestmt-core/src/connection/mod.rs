//! Connection lifecycle, one-shot execution and last-error state.
//!
//! A [`Connection`] owns the engine handle. Every [`PreparedStatement`] it
//! creates keeps only a weak reference back to the connection's shared state,
//! and registers its compiled handle in a slot the connection can empty. This
//! lets [`Connection::close`] finalize every outstanding statement before the
//! engine handle goes away, so later use of such a statement reports
//! [`DatabaseError::NotOpen`] instead of touching a dead handle.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use rusqlite::OpenFlags;

use crate::engine::{Engine, EngineConnection, EngineError, EngineStatement, OpenTarget};
use crate::error::{DatabaseError, EngineResultExt, Result};
use crate::statement::{PreparedStatement, ResultCursor};
use crate::value::Value;

mod builder;
mod introspection;
mod policy;
mod transaction;

#[cfg(test)]
mod tests;

pub use builder::{ConnectionBuilder, OpenMode, DATABASE_EXTENSION};
pub use introspection::ColumnInfo;
pub use policy::{Policy, Trace, DEFAULT_BUSY_RETRIES};

use transaction::TransactionStatements;

/// A compiled engine statement that the owning connection can finalize.
pub(crate) type StatementSlot = RefCell<Option<Box<dyn EngineStatement>>>;

/// The most recent engine failure seen by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Extended result code reported by the engine
    pub code: i32,
    /// Engine-supplied message
    pub message: String,
}

impl From<&EngineError> for LastError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.extended_code,
            message: err.message.clone(),
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// State shared between a connection and its statements.
pub(crate) struct Shared {
    name: String,
    handle: RefCell<Option<Box<dyn EngineConnection>>>,
    policy: Cell<Policy>,
    last_error: RefCell<Option<LastError>>,
    statements: RefCell<Vec<Weak<StatementSlot>>>,
}

impl Shared {
    fn new(name: String, policy: Policy) -> Self {
        Self {
            name,
            handle: RefCell::new(None),
            policy: Cell::new(policy),
            last_error: RefCell::new(None),
            statements: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The policy in force right now.
    pub(crate) fn policy(&self) -> Policy {
        self.policy.get()
    }

    fn update_policy(&self, update: impl FnOnce(&mut Policy)) {
        let mut policy = self.policy.get();
        update(&mut policy);
        self.policy.set(policy);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.borrow().is_some()
    }

    /// Runs `f` against the open engine handle.
    pub(crate) fn with_handle<T>(&self, f: impl FnOnce(&dyn EngineConnection) -> T) -> Result<T> {
        let handle = self.handle.borrow();
        let handle = handle.as_deref().ok_or(DatabaseError::NotOpen)?;
        Ok(f(handle))
    }

    /// Tracks a statement slot so `close` can finalize it.
    pub(crate) fn register(&self, slot: &Rc<StatementSlot>) {
        let mut statements = self.statements.borrow_mut();
        statements.retain(|weak| weak.strong_count() > 0);
        statements.push(Rc::downgrade(slot));
    }

    /// Finalizes every live statement. Returns how many were finalized.
    fn finalize_all(&self) -> usize {
        let mut finalized = 0;
        for weak in self.statements.borrow_mut().drain(..) {
            let Some(slot) = weak.upgrade() else {
                continue;
            };
            let Ok(mut statement) = slot.try_borrow_mut() else {
                warn!("[{}] statement in use during close", self.name);
                continue;
            };
            if statement.take().is_some() {
                finalized += 1;
            }
        }
        finalized
    }

    /// Records an engine failure and logs it when error logging is on.
    pub(crate) fn record(&self, context: &str, err: &EngineError) {
        if self.policy().log_errors {
            error!("[{}] {}: {}", self.name, context, err);
        }
        *self.last_error.borrow_mut() = Some(LastError::from(err));
    }

    pub(crate) fn clear_error(&self) {
        self.last_error.borrow_mut().take();
    }
}

/// A connection to one database in one of the four [`OpenMode`]s.
///
/// Connections are created closed by [`ConnectionBuilder`] and must be
/// [`open`](Connection::open)ed before use.
pub struct Connection {
    shared: Rc<Shared>,
    engine: Box<dyn Engine>,
    mode: OpenMode,
    open_flags: Option<OpenFlags>,
    busy_timeout: Option<Duration>,
    transactions: TransactionStatements,
}

impl Connection {
    pub(crate) fn new(
        engine: Box<dyn Engine>,
        name: String,
        mode: OpenMode,
        policy: Policy,
        open_flags: Option<OpenFlags>,
        busy_timeout: Option<Duration>,
    ) -> Self {
        Self {
            shared: Rc::new(Shared::new(name, policy)),
            engine,
            mode,
            open_flags,
            busy_timeout,
            transactions: TransactionStatements::default(),
        }
    }

    /// Opens the database. Opening an open connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::FileSystem` if a required file is missing or
    /// cannot be copied, and `DatabaseError::Engine` if the engine refuses
    /// to open the store. A Cache store whose schema fails is removed again.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            debug!("[{}] already open", self.name());
            return Ok(());
        }
        self.shared.clear_error();

        let mut created = false;
        let handle = match &self.mode {
            OpenMode::ReadOnly { bundled } => {
                if !bundled.exists() {
                    return Err(DatabaseError::file_system(
                        bundled,
                        io::Error::new(io::ErrorKind::NotFound, "bundled database not found"),
                    ));
                }
                self.open_file(bundled, self.file_flags(false))?
            }
            OpenMode::ReadWrite { bundled, local } => {
                if !local.exists() {
                    self.copy_template(bundled, local)?;
                }
                self.open_file(local, self.file_flags(true))?
            }
            OpenMode::Cache { local, .. } => {
                if !local.exists() {
                    created = true;
                    create_parent_dir(local)?;
                    if self.shared.policy().trace.contains(Trace::FILE_OPERATIONS) {
                        info!("[{}] creating store {}", self.name(), local.display());
                    }
                }
                self.open_file(local, self.file_flags(true) | OpenFlags::SQLITE_OPEN_CREATE)?
            }
            OpenMode::Memory => self
                .engine
                .open(OpenTarget::Memory)
                .map_err(|err| self.open_failure(":memory:", err))?,
        };

        if let Some(timeout) = self.busy_timeout {
            if let Err(err) = handle.set_busy_timeout(timeout) {
                self.shared.record("set busy timeout", &err);
                if let Err(close_err) = handle.close() {
                    warn!("[{}] failed to close after error: {}", self.name(), close_err);
                }
                return Err(DatabaseError::engine("Failed to set busy timeout").with_source(err));
            }
        }

        *self.shared.handle.borrow_mut() = Some(handle);
        if self.shared.policy().trace.contains(Trace::LIFECYCLE) {
            debug!("[{}] opened {}", self.name(), self.mode);
        }

        if created {
            if let Err(err) = self.apply_schema() {
                self.discard_store();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Finalizes every statement created from this connection, then closes
    /// the engine handle. Closing a closed connection does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.transactions.clear();
        let finalized = self.shared.finalize_all();

        let Some(handle) = self.shared.handle.borrow_mut().take() else {
            return Ok(());
        };
        if self.shared.policy().trace.contains(Trace::LIFECYCLE) {
            debug!(
                "[{}] closing, finalized {} statement(s)",
                self.name(),
                finalized
            );
        }
        let closed = handle.close();
        if let Err(err) = &closed {
            self.shared.record("close", err);
        }
        closed.engine_context("Failed to close database")
    }

    /// Compiles `sql`, which must hold exactly one statement.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Compile` for invalid or empty SQL, or for text
    /// that holds more than one statement.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        PreparedStatement::prepare(&self.shared, sql)
    }

    /// Runs one statement to completion and returns the number of changed
    /// rows. Any rows it produces are discarded.
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let mut statement = self.prepare(sql)?;
        let changes = statement.run_with(args)?;
        statement.close();
        Ok(changes)
    }

    /// Runs a query and returns a cursor that owns its statement.
    pub fn select(&self, sql: &str, args: &[Value]) -> Result<ResultCursor<'static>> {
        self.prepare(sql)?.into_cursor(args)
    }

    /// Runs every statement of a multi-statement text in order.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.shared.clear_error();
        let mut rest = sql;
        while !rest.trim().is_empty() {
            let (statement, tail) = PreparedStatement::compile_first(&self.shared, rest)?;
            if let Some(mut statement) = statement {
                statement.run()?;
                statement.close();
            } else if tail == 0 {
                break;
            }
            rest = rest.get(tail..).unwrap_or_default();
        }
        Ok(())
    }

    /// Logical name of the database.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Mode and resolved paths.
    pub fn mode(&self) -> &OpenMode {
        &self.mode
    }

    /// Read-only source file, for ReadOnly and ReadWrite connections.
    pub fn bundled_path(&self) -> Option<&Path> {
        self.mode.bundled_path()
    }

    /// Writable file, for ReadWrite and Cache connections.
    pub fn local_path(&self) -> Option<&Path> {
        self.mode.local_path()
    }

    /// Whether the file this connection opens exists on disk. Always false
    /// for Memory connections, which have no file.
    pub fn exists(&self) -> bool {
        match &self.mode {
            OpenMode::ReadOnly { bundled } => bundled.exists(),
            OpenMode::ReadWrite { local, .. } | OpenMode::Cache { local, .. } => local.exists(),
            OpenMode::Memory => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Open and able to answer a trivial query.
    pub fn is_healthy(&self) -> bool {
        self.is_open()
            && self
                .select("SELECT 1", &[])
                .and_then(|mut cursor| cursor.next())
                .unwrap_or(false)
    }

    /// True when no explicit transaction is active. A closed connection is
    /// always in auto-commit mode.
    pub fn is_autocommit(&self) -> bool {
        self.shared
            .with_handle(|handle| handle.is_autocommit())
            .unwrap_or(true)
    }

    /// Rows modified by the most recent write.
    pub fn changes(&self) -> Result<u64> {
        self.shared.with_handle(|handle| handle.changes())
    }

    /// Row id of the most recent successful insert.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        self.shared.with_handle(|handle| handle.last_insert_rowid())
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.shared.last_error.borrow().clone()
    }

    /// Extended code of the last failure, or 0 when the last call succeeded.
    pub fn last_error_code(&self) -> i32 {
        self.shared
            .last_error
            .borrow()
            .as_ref()
            .map_or(0, |err| err.code)
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.shared
            .last_error
            .borrow()
            .as_ref()
            .map(|err| err.message.clone())
    }

    pub fn had_error(&self) -> bool {
        self.shared.last_error.borrow().is_some()
    }

    pub fn policy(&self) -> Policy {
        self.shared.policy()
    }

    pub fn busy_retries(&self) -> u32 {
        self.shared.policy().busy_retries
    }

    /// Changes the retry budget. Existing statements use it on their next
    /// step.
    pub fn set_busy_retries(&self, retries: u32) {
        self.shared.update_policy(|policy| policy.busy_retries = retries);
    }

    pub fn log_errors(&self) -> bool {
        self.shared.policy().log_errors
    }

    pub fn set_log_errors(&self, enabled: bool) {
        self.shared.update_policy(|policy| policy.log_errors = enabled);
    }

    pub fn trace(&self) -> Trace {
        self.shared.policy().trace
    }

    pub fn set_trace(&self, trace: Trace) {
        self.shared.update_policy(|policy| policy.trace = trace);
    }

    /// Version of the engine library.
    pub fn engine_version(&self) -> String {
        self.engine.version()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DatabaseError::NotOpen)
        }
    }

    /// Open flags for a file, with the access bits forced by the mode.
    fn file_flags(&self, writable: bool) -> OpenFlags {
        let access = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE;
        let base = self
            .open_flags
            .unwrap_or(OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .difference(access);
        if writable {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE
        } else {
            base | OpenFlags::SQLITE_OPEN_READ_ONLY
        }
    }

    fn open_file(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn EngineConnection>> {
        self.engine
            .open(OpenTarget::File { path, flags })
            .map_err(|err| self.open_failure(&path.display().to_string(), err))
    }

    fn open_failure(&self, target: &str, err: EngineError) -> DatabaseError {
        self.shared.record(&format!("open {target}"), &err);
        DatabaseError::engine(format!("Failed to open {target}")).with_source(err)
    }

    fn copy_template(&self, bundled: &Path, local: &Path) -> Result<()> {
        if !bundled.exists() {
            return Err(DatabaseError::file_system(
                bundled,
                io::Error::new(io::ErrorKind::NotFound, "bundled database not found"),
            ));
        }
        create_parent_dir(local)?;
        if self.shared.policy().trace.contains(Trace::FILE_OPERATIONS) {
            info!(
                "[{}] copying {} to {}",
                self.name(),
                bundled.display(),
                local.display()
            );
        }
        if let Err(err) = std::fs::copy(bundled, local) {
            // A partial copy would be mistaken for a valid store next time.
            let _ = std::fs::remove_file(local);
            return Err(DatabaseError::file_system(local, err));
        }
        Ok(())
    }

    fn apply_schema(&mut self) -> Result<()> {
        let schema = match &self.mode {
            OpenMode::Cache { schema, .. } if !schema.is_empty() => schema.clone(),
            _ => return Ok(()),
        };
        self.with_transaction(|connection| {
            schema
                .iter()
                .try_for_each(|script| connection.execute_script(script))
        })
    }

    /// Closes and deletes a Cache store whose initialization failed.
    fn discard_store(&mut self) {
        if let Err(err) = self.close() {
            warn!("[{}] {}", self.name(), err);
        }
        if let Some(local) = self.mode.local_path() {
            match std::fs::remove_file(local) {
                Ok(()) => {
                    if self.shared.policy().trace.contains(Trace::FILE_OPERATIONS) {
                        info!("[{}] removed {}", self.name(), local.display());
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("[{}] failed to remove {}: {}", self.name(), local.display(), err),
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("[{}] {}", self.name(), err);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("policy", &self.policy())
            .finish()
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|err| DatabaseError::file_system(parent, err)),
        _ => Ok(()),
    }
}
