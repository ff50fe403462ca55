mod common;

use litestmt_core::{ConnectionBuilder, DatabaseError, OpenMode, Value};
use rusqlite::{ErrorCode, OpenFlags};

use common::{count_rows, create_bundle, create_test_dirs, memory_connection, CATALOG};

#[test]
fn test_memory_open_close_cycle() {
    let mut connection = ConnectionBuilder::memory()
        .build()
        .expect("Failed to build connection");
    assert!(!connection.is_open());
    assert_eq!(connection.name(), "memory");
    assert_eq!(connection.mode(), &OpenMode::Memory);
    assert!(connection.local_path().is_none());

    for _ in 0..3 {
        connection.open().expect("Failed to open");
        assert!(connection.is_open());
        assert!(connection.is_healthy());
        assert!(!connection.exists());
        connection.close().expect("Failed to close");
        assert!(!connection.is_open());
    }
}

#[test]
fn test_read_only_opens_bundle_in_place() {
    let (_temp_dir, bundle_dir, _data_dir) = create_test_dirs();
    let bundled = create_bundle(&bundle_dir, "catalog", CATALOG);

    let mut connection = ConnectionBuilder::read_only("catalog")
        .with_bundle_dir(Some(&bundle_dir))
        .with_log_errors(false)
        .build()
        .expect("Failed to build connection");
    assert_eq!(connection.bundled_path(), Some(bundled.as_path()));
    assert!(connection.local_path().is_none());
    assert!(connection.exists());

    connection.open().expect("Failed to open");
    let mut cursor = connection
        .select("SELECT title FROM book ORDER BY year", &[])
        .expect("Failed to select");
    assert!(cursor.next().expect("Failed to read row"));
    assert_eq!(cursor.text("title").expect("Failed to read title"), "Dune");
    drop(cursor);

    let err = connection
        .execute("INSERT INTO book (title) VALUES ('Solaris')", &[])
        .expect_err("Writes to a read-only store should fail");
    let source = err.engine_source().expect("Expected an engine error");
    assert_eq!(source.code, ErrorCode::ReadOnly);
    assert!(connection.had_error());
    assert!(connection.last_error_message().is_some());

    connection.close().expect("Failed to close");
    assert_eq!(count_rows(&bundled, "book"), 2);
}

#[test]
fn test_read_only_ignores_write_flags() {
    let (_temp_dir, bundle_dir, _data_dir) = create_test_dirs();
    create_bundle(&bundle_dir, "catalog", CATALOG);

    let connection = ConnectionBuilder::read_only("catalog")
        .with_bundle_dir(Some(&bundle_dir))
        .with_open_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE)
        .with_log_errors(false)
        .open()
        .expect("Failed to open");

    assert!(connection
        .execute("DELETE FROM book", &[])
        .is_err());
}

#[test]
fn test_read_only_missing_bundle() {
    let (_temp_dir, bundle_dir, _data_dir) = create_test_dirs();

    let mut connection = ConnectionBuilder::read_only("absent")
        .with_bundle_dir(Some(&bundle_dir))
        .build()
        .expect("Failed to build connection");
    assert!(!connection.exists());
    assert!(matches!(
        connection.open(),
        Err(DatabaseError::FileSystem { .. })
    ));
    assert!(!connection.is_open());
}

#[test]
fn test_read_write_copies_bundle_once() {
    let (_temp_dir, bundle_dir, data_dir) = create_test_dirs();
    let bundled = create_bundle(&bundle_dir, "catalog", CATALOG);

    let mut connection = ConnectionBuilder::read_write("catalog")
        .with_bundle_dir(Some(&bundle_dir))
        .with_data_dir(Some(&data_dir))
        .build()
        .expect("Failed to build connection");
    let local = data_dir.join("catalog.sqlite");
    assert_eq!(connection.local_path(), Some(local.as_path()));
    assert!(!connection.exists());

    connection.open().expect("Failed to open");
    assert!(local.exists());
    let changes = connection
        .execute(
            "INSERT INTO book (title, year) VALUES (?1, ?2)",
            &["Solaris".into(), 1961.into()],
        )
        .expect("Failed to insert");
    assert_eq!(changes, 1);
    assert_eq!(
        connection.last_insert_rowid().expect("Failed to read rowid"),
        3
    );
    connection.close().expect("Failed to close");

    // The second open keeps the local copy instead of copying again.
    connection.open().expect("Failed to reopen");
    connection.close().expect("Failed to close");
    assert_eq!(count_rows(&local, "book"), 3);
    assert_eq!(count_rows(&bundled, "book"), 2);
}

#[test]
fn test_read_write_missing_bundle() {
    let (_temp_dir, bundle_dir, data_dir) = create_test_dirs();

    let mut connection = ConnectionBuilder::read_write("absent")
        .with_bundle_dir(Some(&bundle_dir))
        .with_data_dir(Some(&data_dir))
        .build()
        .expect("Failed to build connection");
    assert!(matches!(
        connection.open(),
        Err(DatabaseError::FileSystem { .. })
    ));
    assert!(!data_dir.join("absent.sqlite").exists());
}

#[test]
fn test_cache_applies_schema_once() {
    let (_temp_dir, _bundle_dir, data_dir) = create_test_dirs();
    let builder = || {
        ConnectionBuilder::cache("sessions")
            .with_data_dir(Some(&data_dir))
            .with_schema(vec![
                "CREATE TABLE session (id INTEGER PRIMARY KEY, token TEXT NOT NULL);".to_string(),
                "CREATE INDEX session_token ON session (token);".to_string(),
            ])
    };

    let mut connection = builder().open().expect("Failed to create cache");
    assert!(connection.bundled_path().is_none());
    assert!(connection
        .table_exists("session")
        .expect("Failed to check table"));
    connection
        .execute("INSERT INTO session (token) VALUES ('abc')", &[])
        .expect("Failed to insert");
    connection.close().expect("Failed to close");

    // Reopening an existing store must not run the schema again.
    let connection = builder().open().expect("Failed to reopen cache");
    let mut cursor = connection
        .select("SELECT token FROM session", &[])
        .expect("Failed to select");
    assert!(cursor.next().expect("Failed to read row"));
    assert_eq!(cursor.text(0).expect("Failed to read token"), "abc");
}

#[test]
fn test_cache_schema_failure_removes_store() {
    let (_temp_dir, _bundle_dir, data_dir) = create_test_dirs();

    let mut connection = ConnectionBuilder::cache("broken")
        .with_data_dir(Some(&data_dir))
        .with_schema(vec![
            "CREATE TABLE fine (x);".to_string(),
            "CREATE TABLE broken (".to_string(),
        ])
        .with_log_errors(false)
        .build()
        .expect("Failed to build connection");

    assert!(matches!(
        connection.open(),
        Err(DatabaseError::Compile { .. })
    ));
    assert!(!connection.is_open());
    assert!(!data_dir.join("broken.sqlite").exists());
}

#[test]
fn test_open_close_cycle_every_mode() {
    let (_temp_dir, bundle_dir, data_dir) = create_test_dirs();
    create_bundle(&bundle_dir, "catalog", CATALOG);

    let builders = vec![
        ConnectionBuilder::read_only("catalog").with_bundle_dir(Some(&bundle_dir)),
        ConnectionBuilder::read_write("catalog")
            .with_bundle_dir(Some(&bundle_dir))
            .with_data_dir(Some(&data_dir)),
        ConnectionBuilder::cache("scratch").with_data_dir(Some(&data_dir)),
        ConnectionBuilder::memory(),
    ];

    for builder in builders {
        let mut connection = builder.build().expect("Failed to build connection");
        for _ in 0..2 {
            connection.open().expect("Failed to open");
            connection.open().expect("Opening twice should succeed");
            assert!(connection.is_healthy(), "{connection:?}");
            connection.close().expect("Failed to close");
            connection.close().expect("Closing twice should succeed");
        }
    }
}

#[test]
fn test_explicit_paths_override_directories() {
    let (temp_dir, bundle_dir, _data_dir) = create_test_dirs();
    let bundled = create_bundle(&bundle_dir, "catalog", CATALOG);
    let local = temp_dir.path().join("elsewhere").join("copy.db");

    let connection = ConnectionBuilder::read_write("ignored")
        .with_bundled_path(Some(&bundled))
        .with_local_path(Some(&local))
        .open()
        .expect("Failed to open");
    assert_eq!(connection.name(), "ignored");
    assert!(local.exists());
}

#[test]
fn test_file_mode_requires_name() {
    let (_temp_dir, _bundle_dir, data_dir) = create_test_dirs();

    let err = ConnectionBuilder::cache("  ")
        .with_data_dir(Some(&data_dir))
        .build()
        .expect_err("An empty name should be rejected");
    assert!(matches!(err, DatabaseError::Configuration { .. }));
}

#[test]
fn test_policy_accessors() {
    let connection = memory_connection();
    assert_eq!(connection.busy_retries(), litestmt_core::DEFAULT_BUSY_RETRIES);
    assert!(!connection.log_errors());

    connection.set_busy_retries(9);
    connection.set_trace(litestmt_core::Trace::QUERIES);
    assert_eq!(connection.busy_retries(), 9);
    assert!(connection.trace().contains(litestmt_core::Trace::QUERIES));
}

#[test]
fn test_last_error_clears_on_success() {
    let connection = memory_connection();

    assert!(connection.execute("SELECT * FROM nowhere", &[]).is_err());
    assert!(connection.had_error());
    assert_ne!(connection.last_error_code(), 0);
    let last = connection.last_error().expect("Expected a recorded error");
    assert!(last.message.contains("nowhere"));

    connection
        .execute("SELECT 1", &[])
        .expect("Failed to execute");
    assert!(!connection.had_error());
    assert_eq!(connection.last_error_code(), 0);
}

#[test]
fn test_execute_script_and_changes() {
    let connection = memory_connection();
    connection
        .execute_script(
            "-- catalog
             CREATE TABLE tag (name TEXT);;
             INSERT INTO tag VALUES ('a');
             INSERT INTO tag VALUES ('b');
             UPDATE tag SET name = upper(name);",
        )
        .expect("Failed to run script");
    assert_eq!(connection.changes().expect("Failed to read changes"), 2);

    let changes = connection
        .execute("DELETE FROM tag WHERE name = ?1", &[Value::from("A")])
        .expect("Failed to delete");
    assert_eq!(changes, 1);
}

#[test]
fn test_introspection() {
    let connection = memory_connection();
    connection
        .execute_script(
            "CREATE TABLE person (
                id INTEGER PRIMARY KEY,
                Name TEXT NOT NULL,
                born TEXT DEFAULT '1970-01-01',
                notes
            );",
        )
        .expect("Failed to create table");

    let columns = connection
        .table_columns("person")
        .expect("Failed to read columns");
    assert_eq!(columns.len(), 4);
    assert!(columns[0].primary_key);
    assert_eq!(columns[1].declared_type, "TEXT");
    assert!(!columns[1].nullable);
    assert_eq!(columns[2].default_value.as_deref(), Some("'1970-01-01'"));
    assert_eq!(columns[3].declared_type, "");
    assert!(columns[3].nullable);
    assert_eq!(columns[1].to_string(), "1: Name TEXT NOT NULL");

    let name = connection
        .column_info("person", "name")
        .expect("Failed to read column")
        .expect("Column should exist");
    assert_eq!(name.cid, 1);
    assert!(connection
        .column_info("person", "missing")
        .expect("Failed to read column")
        .is_none());

    assert!(connection.table_exists("PERSON").expect("Failed to check"));
    assert!(!connection.table_exists("animal").expect("Failed to check"));
    assert!(connection
        .table_columns("animal")
        .expect("Failed to read columns")
        .is_empty());
}

#[test]
fn test_schema_text() {
    let connection = memory_connection();
    assert_eq!(connection.schema(None).expect("Failed to read schema"), "");

    connection
        .execute_script(
            "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT);
             CREATE INDEX person_name ON person (name);
             CREATE TABLE animal (id INTEGER PRIMARY KEY);",
        )
        .expect("Failed to create tables");

    assert_eq!(
        connection
            .schema(Some("Person"))
            .expect("Failed to read table schema"),
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT);\n\
         CREATE INDEX person_name ON person (name);\n"
    );

    let schema = connection.schema(None).expect("Failed to read schema");
    assert_eq!(schema.lines().count(), 3);
    assert!(schema.ends_with("CREATE TABLE animal (id INTEGER PRIMARY KEY);\n"));

    assert_eq!(
        connection
            .schema(Some("missing"))
            .expect("Failed to read schema"),
        ""
    );
}

#[test]
fn test_engine_version() {
    let connection = memory_connection();
    assert!(connection.engine_version().starts_with('3'));
}
