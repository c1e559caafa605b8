// ABOUTME: Security tests for WHERE-clause filtering, literal quoting and SQLite paths
// ABOUTME: Validates protection against SQL injection through filters, row data and file names

use dbtransfer::adapter::sqlite::validate_sqlite_path;
use dbtransfer::adapter::{DatabaseAdapter, SqliteAdapter};
use dbtransfer::dialect::AdapterType;
use dbtransfer::error::TransferError;
use dbtransfer::export::Exporter;
use dbtransfer::import::Importer;
use dbtransfer::options::TransferOptions;
use dbtransfer::schema::count_rows;
use dbtransfer::storage::{FileSystem, MemoryFileSystem};
use dbtransfer::where_clause::{is_valid, parameterize, validate};
use std::path::Path;

/// Helper to create an in-memory database with a users table
fn create_users_db() -> SqliteAdapter {
    let adapter = SqliteAdapter::open_in_memory().unwrap();
    adapter
        .execute(
            "
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                updated_at TEXT
            );

            INSERT INTO users VALUES (1, 'Alice', '2024-01-01'), (2, 'Bob', '2024-06-01');
        ",
        )
        .unwrap();
    adapter
}

// ============================================================================
// WHERE-Clause Validation Tests
// ============================================================================

#[test]
fn test_injection_payloads_rejected() {
    let payloads = vec![
        "id = 1; DROP TABLE users",
        "id = 1 -- comment",
        "id = 1 /* hidden */",
        "id = 1 # mysql comment",
        "id = 1 UNION SELECT password FROM admins",
        "id IN (SELECT id FROM admins)",
        "id = 1 AND SLEEP(5)",
        "id = BENCHMARK(1000000, MD5(1))",
        "name = LOAD_FILE('/etc/passwd')",
        "name = CHAR(65)",
        "id = 0x41",
        "name IN (SELECT table_name FROM information_schema.tables)",
        "id = 1; DELETE FROM users",
        "name = 'unterminated",
        "(id = 1",
    ];

    for payload in payloads {
        assert!(!is_valid(payload), "Payload should be rejected: {}", payload);
        assert!(matches!(
            validate(payload),
            Err(TransferError::Validation(_))
        ));
    }
}

#[test]
fn test_benign_clauses_accepted() {
    let clauses = vec![
        "updated_at > '2024-01-01'",
        "created_by = 5",
        "name LIKE 'A%'",
        "deleted_at IS NULL",
        "name = 'O''Brien'",
        "status IN ('active', 'pending') AND id >= 10",
    ];

    for clause in clauses {
        assert!(is_valid(clause), "Clause should be accepted: {}", clause);
    }
}

#[test]
fn test_parameterizer_never_inlines_values() {
    let clause = parameterize("name = 'x'' OR ''1''=''1'", AdapterType::Sqlite).unwrap();
    assert_eq!(clause.sql, "\"name\" = ?");
    assert_eq!(clause.bindings, vec!["x' OR '1'='1"]);
    assert_eq!(clause.placeholder_count(), 1);
}

#[test]
fn test_rejected_where_fails_export_before_writing() {
    let mut options = TransferOptions::default();
    options.add_where("users:id = 1; DROP TABLE users").unwrap();
    let mut exporter =
        Exporter::new(Box::new(create_users_db()), options).with_file_system(Box::new(MemoryFileSystem::new()));

    let err = exporter.export_to_file(Path::new("/out/dump.sql")).unwrap_err();
    assert!(matches!(err, TransferError::Validation(_)));
    assert!(!exporter.file_system().file_exists(Path::new("/out/dump.sql")));
    assert_eq!(count_rows(exporter.adapter(), "users", None).unwrap(), 2);
}

#[test]
fn test_where_filter_with_quote_payload_matches_nothing() {
    let mut options = TransferOptions::default();
    options.add_where("users:name = 'x'' OR ''1''=''1'").unwrap();
    let exporter = Exporter::new(Box::new(create_users_db()), options);
    assert_eq!(exporter.table_row_count("users").unwrap(), 0);
}

// ============================================================================
// Row Data Quoting Tests
// ============================================================================

#[test]
fn test_hostile_row_values_survive_sql_round_trip() {
    let source = create_users_db();
    source
        .execute("INSERT INTO users VALUES (3, 'Robert''); DROP TABLE users;--', NULL)")
        .unwrap();

    let fs = MemoryFileSystem::new();
    let mut exporter = Exporter::new(Box::new(source), TransferOptions::default())
        .with_file_system(Box::new(fs));
    exporter.export_to_file(Path::new("/out/dump.sql")).unwrap();
    let dump = exporter
        .file_system()
        .read_file(Path::new("/out/dump.sql"))
        .unwrap();

    let replay = MemoryFileSystem::new();
    replay.write_file(Path::new("/in/dump.sql"), &dump).unwrap();
    let target = create_users_db();
    let mut importer =
        Importer::new(Box::new(target), TransferOptions::default()).with_file_system(Box::new(replay));
    assert!(importer.import_from_file(Path::new("/in/dump.sql")).unwrap());

    let row = importer
        .adapter()
        .fetch_row("SELECT name FROM users WHERE id = 3", &[])
        .unwrap()
        .unwrap();
    assert_eq!(row["name"], serde_json::json!("Robert'); DROP TABLE users;--"));
    assert_eq!(count_rows(importer.adapter(), "users", None).unwrap(), 3);
}

// ============================================================================
// Path Validation Tests
// ============================================================================

#[test]
fn test_sqlite_path_requires_database_extension() {
    for path in ["", "   ", "/etc/passwd", "notes.txt", "database"] {
        assert!(
            validate_sqlite_path(path).is_err(),
            "Path should be rejected: {:?}",
            path
        );
    }
    assert!(validate_sqlite_path("app.sqlite3").is_ok());
    assert!(validate_sqlite_path(":memory:").is_ok());
}

#[test]
fn test_sqlite_path_rejects_directory() {
    let dir = tempfile::tempdir().unwrap();
    let fake = dir.path().join("looks.db");
    std::fs::create_dir(&fake).unwrap();
    assert!(validate_sqlite_path(fake.to_str().unwrap()).is_err());
}
