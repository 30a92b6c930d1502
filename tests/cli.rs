use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TABLES: &str = r#"[
  {
    "name": "orders",
    "columns": ["amount", "status"],
    "primaryKeyColumn": "id",
    "insertDateColumn": "created_at",
    "updateDateColumn": "updated_at"
  }
]"#;

fn rowmirror(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rowmirror").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("DATABASE_URL")
        .env_remove("MIRROR_TABLES_CONFIG")
        .env_remove("MIRROR_TABLES_JSON")
        .env_remove("MIRROR_TABLES_FILE")
        .env_remove("RUST_LOG")
        .env_remove("LOG_LEVEL");
    cmd
}

#[test]
fn help_lists_run_modes() {
    let dir = TempDir::new().unwrap();
    rowmirror(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("incremental"))
        .stdout(predicate::str::contains("fulltable"))
        .stdout(predicate::str::contains("period"));
}

#[test]
fn init_writes_loadable_config() {
    let dir = TempDir::new().unwrap();
    rowmirror(&dir)
        .args(["init", "--output", "mirror.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created: mirror.toml"));

    let path = dir.path().join("mirror.toml");
    let config = rowmirror::MirrorConfig::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.sink.database, "mirror");
    assert_eq!(config.checkpoint.collection, "_lastRun");
    assert_eq!(config.tables_file.as_deref(), Some("tables.json"));
}

#[test]
fn period_rejects_inverted_range_before_connecting() {
    let dir = TempDir::new().unwrap();
    rowmirror(&dir)
        .args(["period", "--from", "2024-01-02", "--to", "2024-01-01"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("from must not be after to"));
}

#[test]
fn period_accepts_short_range_flags() {
    let dir = TempDir::new().unwrap();
    rowmirror(&dir)
        .args(["period", "-f", "2024-01-02", "-t", "2024-01-01"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("from must not be after to"));
}

#[test]
fn period_rejects_malformed_timestamp() {
    let dir = TempDir::new().unwrap();
    rowmirror(&dir)
        .args(["period", "--from", "last tuesday"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Invalid timestamp"));
}

#[test]
fn fulltable_unknown_table_fails_before_connecting() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tables.json"), TABLES).unwrap();

    rowmirror(&dir)
        .args(["fulltable", "customers", "--tables", "tables.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("'customers' not found"));
}

#[test]
fn invalid_table_list_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tables.json"), r#"{"nope": true}"#).unwrap();

    rowmirror(&dir)
        .args(["fulltable", "orders"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Invalid table list"));
}

#[test]
fn generate_secret_encodes_table_list() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tables.json"), TABLES).unwrap();

    rowmirror(&dir)
        .args(["generate-secret", "--input", "tables.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MIRROR_TABLES_CONFIG"));
}
