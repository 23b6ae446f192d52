//! `SQLite` schema bootstrap logic.
//!
//! Every statement is idempotent and runs on each startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS protected_package (
    seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL CHECK(user_id >= 0),
    package_name        TEXT NOT NULL,
    redact_notification INTEGER NOT NULL DEFAULT 0,
    hidden              INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    UNIQUE(user_id, package_name)
);

CREATE TABLE IF NOT EXISTS user_policy (
    user_id             INTEGER PRIMARY KEY NOT NULL CHECK(user_id >= 0),
    timeout_millis      INTEGER NOT NULL,
    biometrics_allowed  INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_protected_package_user ON protected_package(user_id, seq);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
