//! Explicit transactions on a connection.

use log::warn;

use super::Connection;
use crate::error::{DatabaseError, Result};
use crate::statement::PreparedStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    BeginImmediate,
    BeginExclusive,
    Commit,
    Rollback,
}

impl Control {
    fn sql(self) -> &'static str {
        match self {
            Control::BeginImmediate => "BEGIN IMMEDIATE",
            Control::BeginExclusive => "BEGIN EXCLUSIVE",
            Control::Commit => "COMMIT",
            Control::Rollback => "ROLLBACK",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Control statements, each prepared on first use.
#[derive(Debug, Default)]
pub(super) struct TransactionStatements {
    statements: [Option<PreparedStatement>; 4],
}

impl TransactionStatements {
    pub(super) fn clear(&mut self) {
        for statement in &mut self.statements {
            if let Some(mut statement) = statement.take() {
                statement.close();
            }
        }
    }
}

impl Connection {
    /// Starts a transaction that takes the write lock immediately.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TransactionState` if a transaction is already
    /// active, and `DatabaseError::Busy` if the lock stays unavailable.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.begin(Control::BeginImmediate)
    }

    /// Starts a transaction that also keeps readers out.
    pub fn begin_exclusive_transaction(&mut self) -> Result<()> {
        self.begin(Control::BeginExclusive)
    }

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TransactionState` when no transaction is
    /// active.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_in_transaction()?;
        self.run_control(Control::Commit)
    }

    /// Rolls back the active transaction.
    ///
    /// An engine failure during rollback is logged and recorded as the last
    /// error, but the call still succeeds.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TransactionState` when no transaction is
    /// active.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_in_transaction()?;
        if let Err(err) = self.run_control(Control::Rollback) {
            warn!("[{}] rollback failed: {}", self.name(), err);
        }
        Ok(())
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    pub fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin_transaction()?;
        let outcome = f(self).and_then(|value| self.commit().map(|()| value));
        if outcome.is_err() && self.is_open() && !self.is_autocommit() {
            self.rollback()?;
        }
        outcome
    }

    fn begin(&mut self, control: Control) -> Result<()> {
        self.ensure_open()?;
        if !self.is_autocommit() {
            return Err(DatabaseError::TransactionState {
                reason: "a transaction is already active",
            });
        }
        self.run_control(control)
    }

    fn ensure_in_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_autocommit() {
            return Err(DatabaseError::TransactionState {
                reason: "no transaction is active",
            });
        }
        Ok(())
    }

    fn run_control(&mut self, control: Control) -> Result<()> {
        let slot = control.slot();
        let mut statement = match self.transactions.statements[slot].take() {
            Some(statement) => statement,
            None => self.prepare(control.sql())?,
        };
        let outcome = statement.run().map(|_| ());
        statement.rewind();
        self.transactions.statements[slot] = Some(statement);
        outcome
    }
}
