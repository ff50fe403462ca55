#![allow(dead_code)]

use std::path::{Path, PathBuf};

use litestmt_core::{Connection, ConnectionBuilder};
use tempfile::TempDir;

/// Helper function to open an in-memory connection
pub fn memory_connection() -> Connection {
    ConnectionBuilder::memory()
        .with_log_errors(false)
        .open()
        .expect("Failed to open in-memory connection")
}

/// Helper function to write a bundled store `<name>.sqlite` into `dir`
pub fn create_bundle(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(format!("{name}.sqlite"));
    let connection = rusqlite::Connection::open(&path).expect("Failed to create bundle");
    connection
        .execute_batch(script)
        .expect("Failed to populate bundle");
    path
}

/// Helper function to create separate bundle and data directories
pub fn create_test_dirs() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let bundle_dir = temp_dir.path().join("bundle");
    let data_dir = temp_dir.path().join("data");
    std::fs::create_dir_all(&bundle_dir).expect("Failed to create bundle dir");
    (temp_dir, bundle_dir, data_dir)
}

/// Helper function to count rows through a second, independent connection
pub fn count_rows(path: &Path, table: &str) -> i64 {
    let connection = rusqlite::Connection::open(path).expect("Failed to open store");
    connection
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("Failed to count rows")
}

pub const CATALOG: &str = "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT NOT NULL, year INTEGER);
INSERT INTO book (title, year) VALUES ('Dune', 1965), ('Neuromancer', 1984);";
