//! Integration tests for the pulsed CLI commands.
//!
//! Tests run in serial and never reach a model or a real feed: every command here either works
//! on the local database only or fails before any network call.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::{tempdir, TempDir};

// Helper function to create a clean command instance with a hermetic environment
fn pulsed(dir: &TempDir) -> Command {
  let config = dir.path().join("config.json");
  if !config.exists() {
    std::fs::write(&config, "{}").unwrap();
  }
  let mut cmd = Command::cargo_bin("pulsed").unwrap();
  cmd
    .current_dir(dir.path())
    .env_remove("PULSE_API_KEY")
    .env_remove("PULSE_BASE_URL")
    .env_remove("PULSE_DATABASE")
    .env_remove("RUST_LOG")
    .arg("--config")
    .arg(config);
  cmd
}

// Helper to get a temporary database path
fn temp_db() -> (TempDir, PathBuf) {
  let dir = tempdir().unwrap();
  let db_path = dir.path().join("test.db");
  (dir, db_path)
}

#[test]
#[serial]
fn test_init_and_clean() {
  let (dir, db_path) = temp_db();

  pulsed(&dir)
    .arg("init")
    .arg("--path")
    .arg(&db_path)
    .arg("--accept-defaults")
    .assert()
    .success()
    .stdout(predicate::str::contains("initialized successfully"));

  assert!(db_path.exists());

  pulsed(&dir)
    .arg("clean")
    .arg("--path")
    .arg(&db_path)
    .arg("--accept-defaults")
    .assert()
    .success()
    .stdout(predicate::str::contains("Database files cleaned"));

  assert!(!db_path.exists());
  dir.close().unwrap();
}

#[test]
#[serial]
fn test_init_keeps_existing_database_with_defaults() {
  let (dir, db_path) = temp_db();

  pulsed(&dir).arg("init").arg("--path").arg(&db_path).arg("--accept-defaults").assert().success();

  pulsed(&dir)
    .arg("init")
    .arg("--path")
    .arg(&db_path)
    .arg("--accept-defaults")
    .assert()
    .success()
    .stdout(predicate::str::contains("Keeping existing database"));

  assert!(db_path.exists());
}

#[test]
#[serial]
fn test_clean_without_database() {
  let (dir, db_path) = temp_db();

  pulsed(&dir)
    .arg("clean")
    .arg("--path")
    .arg(&db_path)
    .arg("--accept-defaults")
    .assert()
    .success()
    .stdout(predicate::str::contains("No database found"));
}

#[test]
#[serial]
fn test_recent_and_fields_on_empty_database() {
  let (dir, db_path) = temp_db();
  pulsed(&dir).arg("init").arg("--path").arg(&db_path).arg("--accept-defaults").assert().success();

  pulsed(&dir)
    .args(["recent", "--days", "3"])
    .arg("--path")
    .arg(&db_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("No articles from the last 3 days"));

  pulsed(&dir)
    .arg("fields")
    .arg("--path")
    .arg(&db_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("No classified articles yet"))
    .stdout(predicate::str::contains("Taxonomy:"));
}

#[test]
#[serial]
fn test_recent_rejects_unknown_field() {
  let (dir, db_path) = temp_db();

  pulsed(&dir)
    .args(["recent", "--field", "Underwater Basket Weaving"])
    .arg("--path")
    .arg(&db_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Underwater Basket Weaving"));
}

#[test]
#[serial]
fn test_model_commands_require_api_key() {
  let (dir, db_path) = temp_db();

  for args in [vec!["ingest", "--no-graphs"], vec!["backfill-graphs"], vec!["reclassify", "--limit", "5"]] {
    pulsed(&dir)
      .args(&args)
      .arg("--path")
      .arg(&db_path)
      .assert()
      .failure()
      .stderr(predicate::str::contains("PULSE_API_KEY"));
  }
}

#[test]
#[serial]
fn test_graph_for_missing_article() {
  let (dir, db_path) = temp_db();
  pulsed(&dir).arg("init").arg("--path").arg(&db_path).arg("--accept-defaults").assert().success();

  pulsed(&dir)
    .args(["graph", "42"])
    .arg("--path")
    .arg(&db_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Article 42 not found"));
}

#[test]
#[serial]
fn test_log_dir_receives_log_file() {
  let (dir, db_path) = temp_db();
  let log_dir = dir.path().join("logs");

  pulsed(&dir)
    .arg("-vv")
    .arg("--log-dir")
    .arg(&log_dir)
    .arg("init")
    .arg("--path")
    .arg(&db_path)
    .arg("--accept-defaults")
    .assert()
    .success();

  let files: Vec<_> = std::fs::read_dir(&log_dir).unwrap().flatten().collect();
  assert!(files.iter().any(|f| f.file_name().to_string_lossy().starts_with("pulsed.log")));
}
