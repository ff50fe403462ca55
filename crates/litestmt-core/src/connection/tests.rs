//! Tests for the connection module using scripted busy signals.

use std::rc::Rc;

use rusqlite::ffi;

use super::*;
use crate::engine::flaky::{Faults, FlakyEngine};

/// Helper function to open an in-memory connection with injectable faults
fn flaky_connection(retries: u32) -> (Connection, Rc<Faults>) {
    let (engine, faults) = FlakyEngine::new();
    let connection = ConnectionBuilder::memory()
        .with_engine(engine)
        .with_busy_retries(retries)
        .with_log_errors(false)
        .open()
        .expect("Failed to open connection");
    (connection, faults)
}

fn seed_numbers(connection: &Connection) {
    connection
        .execute_script(
            "CREATE TABLE numbers (n INTEGER NOT NULL);
             INSERT INTO numbers VALUES (1), (2), (3);",
        )
        .expect("Failed to seed numbers");
}

#[test]
fn test_busy_below_budget_succeeds() {
    let (connection, faults) = flaky_connection(5);
    let steps_before = faults.steps();

    faults.inject_busy(4);
    let mut cursor = connection
        .select("SELECT 42", &[])
        .expect("Busy below budget should be retried");
    assert!(cursor.next().expect("Failed to read row"));
    assert_eq!(cursor.int(0).expect("Failed to read column"), 42);

    assert_eq!(faults.pending_busy(), 0);
    assert_eq!(faults.steps() - steps_before, 5);
    assert!(!connection.had_error());
}

#[test]
fn test_busy_at_budget_fails() {
    let (connection, faults) = flaky_connection(5);

    faults.inject_busy(5);
    let err = connection
        .execute("CREATE TABLE t (x)", &[])
        .expect_err("Busy at budget should fail");

    assert!(matches!(err, DatabaseError::Busy { attempts: 5 }));
    assert!(err.is_busy());
    assert!(connection.had_error());
    assert_eq!(connection.last_error_code(), ffi::SQLITE_BUSY);
    assert!(!connection.table_exists("t").expect("Failed to check table"));
}

#[test]
fn test_zero_retries_fails_on_first_busy() {
    let (connection, faults) = flaky_connection(0);

    faults.inject_busy(1);
    let err = connection
        .execute("SELECT 1", &[])
        .expect_err("No retries should fail immediately");
    assert!(matches!(err, DatabaseError::Busy { attempts: 1 }));
}

#[test]
fn test_retry_budget_is_read_at_each_step() {
    let (connection, faults) = flaky_connection(10);
    let mut statement = connection
        .prepare("SELECT 1")
        .expect("Failed to prepare statement");

    connection.set_busy_retries(2);
    faults.inject_busy(2);
    assert!(matches!(
        statement.select(),
        Err(DatabaseError::Busy { attempts: 2 })
    ));

    connection.set_busy_retries(3);
    faults.inject_busy(2);
    let mut cursor = statement.select().expect("Lowered busy count should pass");
    assert!(cursor.next().expect("Failed to read row"));
}

#[test]
fn test_busy_mid_iteration_keeps_position() {
    let (connection, faults) = flaky_connection(3);
    seed_numbers(&connection);

    let mut cursor = connection
        .select("SELECT n FROM numbers ORDER BY n", &[])
        .expect("Failed to select");
    assert!(cursor.next().expect("Failed to read first row"));
    assert_eq!(cursor.int64("n").expect("Failed to read n"), 1);

    faults.inject_busy(3);
    assert!(matches!(cursor.next(), Err(DatabaseError::Busy { .. })));
    assert!(matches!(
        cursor.int64("n"),
        Err(DatabaseError::CursorMisuse { .. })
    ));

    // The retried step continues where the busy one stopped.
    assert!(cursor.next().expect("Retry should succeed"));
    assert_eq!(cursor.int64("n").expect("Failed to read n"), 2);
    assert!(cursor.next().expect("Failed to read third row"));
    assert_eq!(cursor.int64("n").expect("Failed to read n"), 3);
    assert!(!cursor.next().expect("Failed to reach the end"));
}

#[test]
fn test_begin_retries_busy() {
    let (mut connection, faults) = flaky_connection(5);

    faults.inject_busy(2);
    connection
        .begin_transaction()
        .expect("Begin should retry busy");
    assert!(!connection.is_autocommit());
    connection.commit().expect("Failed to commit");
    assert!(connection.is_autocommit());
}

#[test]
fn test_failed_rollback_is_swallowed() {
    let (mut connection, faults) = flaky_connection(2);
    seed_numbers(&connection);

    connection
        .begin_transaction()
        .expect("Failed to begin transaction");
    connection
        .execute("DELETE FROM numbers", &[])
        .expect("Failed to delete");

    faults.inject_busy(2);
    connection
        .rollback()
        .expect("Rollback failures are not reported");
    assert_eq!(connection.last_error_code(), ffi::SQLITE_BUSY);
    assert!(!connection.is_autocommit());

    connection.rollback().expect("Second rollback should succeed");
    assert!(connection.is_autocommit());
    assert!(!connection.had_error());

    let mut cursor = connection
        .select("SELECT COUNT(*) FROM numbers", &[])
        .expect("Failed to count");
    assert!(cursor.next().expect("Failed to read count"));
    assert_eq!(cursor.int(0).expect("Failed to read count"), 3);
}

#[test]
fn test_close_invalidates_statements() {
    let (mut connection, _faults) = flaky_connection(5);
    let mut statement = connection
        .prepare("SELECT 1")
        .expect("Failed to prepare statement");

    connection.close().expect("Failed to close");
    assert!(!connection.is_open());
    assert!(matches!(statement.select(), Err(DatabaseError::NotOpen)));

    // Reopening does not revive statements from the earlier handle.
    connection.open().expect("Failed to reopen");
    assert!(matches!(statement.select(), Err(DatabaseError::NotOpen)));
    assert!(connection.is_healthy());
}

#[test]
fn test_close_invalidates_open_cursors() {
    let (mut connection, _faults) = flaky_connection(5);
    seed_numbers(&connection);

    let mut cursor = connection
        .select("SELECT n FROM numbers ORDER BY n", &[])
        .expect("Failed to select");
    assert!(cursor.next().expect("Failed to read row"));
    assert_eq!(cursor.int(0).expect("Failed to read n"), 1);

    let mut statement = connection
        .prepare("SELECT n FROM numbers ORDER BY n")
        .expect("Failed to prepare statement");
    let mut borrowed = statement.select().expect("Failed to select");
    assert!(borrowed.next().expect("Failed to read row"));

    connection.close().expect("Failed to close");

    assert!(matches!(cursor.int(0), Err(DatabaseError::NotOpen)));
    assert!(matches!(cursor.next(), Err(DatabaseError::NotOpen)));
    assert!(matches!(borrowed.int64("n"), Err(DatabaseError::NotOpen)));
    assert!(matches!(borrowed.next(), Err(DatabaseError::NotOpen)));
}

#[test]
fn test_closed_connection_rejects_work() {
    let (mut connection, _faults) = flaky_connection(5);
    connection.close().expect("Failed to close");
    connection.close().expect("Closing twice should succeed");

    assert!(matches!(
        connection.prepare("SELECT 1"),
        Err(DatabaseError::NotOpen)
    ));
    assert!(matches!(
        connection.execute("SELECT 1", &[]),
        Err(DatabaseError::NotOpen)
    ));
    assert!(matches!(
        connection.begin_transaction(),
        Err(DatabaseError::NotOpen)
    ));
    assert!(!connection.is_healthy());
}

#[test]
fn test_open_twice_is_noop() {
    let (mut connection, _faults) = flaky_connection(5);
    seed_numbers(&connection);

    connection.open().expect("Second open should succeed");
    assert!(connection
        .table_exists("numbers")
        .expect("Failed to check table"));
}
