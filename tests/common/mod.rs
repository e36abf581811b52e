//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use sightline_core::db::{db_init, DbConnection};
use tempfile::TempDir;

/// Open a fresh graph database inside `temp_dir`.
#[allow(dead_code)]
pub async fn open_test_db(temp_dir: &TempDir) -> DbConnection {
    let pool = db_init(temp_dir.path().join("sightline.db"))
        .await
        .expect("Failed to initialize graph db");
    DbConnection(pool)
}
