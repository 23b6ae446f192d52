//! Protected package repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::package::ProtectedPackage;
use crate::models::user_policy::UserPolicy;
use crate::models::UserId;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for protected package records.
#[derive(Clone)]
pub struct PackageRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct PackageRow {
    user_id: i64,
    package_name: String,
    redact_notification: i64,
    hidden: i64,
    created_at: String,
}

impl PackageRow {
    /// Convert a database row into the domain model.
    fn into_package(self) -> Result<ProtectedPackage> {
        let user = parse_user_id(self.user_id)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(ProtectedPackage {
            user,
            package_name: self.package_name,
            redact_notification: self.redact_notification != 0,
            hidden: self.hidden != 0,
            created_at,
        })
    }
}

pub(crate) fn parse_user_id(raw: i64) -> Result<UserId> {
    u32::try_from(raw)
        .map(UserId)
        .map_err(|_| AppError::Db(format!("invalid user_id: {raw}")))
}

const SELECT_COLUMNS: &str =
    "SELECT user_id, package_name, redact_notification, hidden, created_at FROM protected_package";

impl PackageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a protected package and create the user's policy row if missing.
    ///
    /// Both writes happen in one transaction. Returns `false` without
    /// changes when the package is already protected for the user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn insert(&self, entry: &ProtectedPackage, policy: &UserPolicy) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO protected_package
             (user_id, package_name, redact_notification, hidden, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(entry.user.as_db())
        .bind(&entry.package_name)
        .bind(i64::from(entry.redact_notification))
        .bind(i64::from(entry.hidden))
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO user_policy (user_id, timeout_millis, biometrics_allowed)
             VALUES (?1, ?2, ?3)",
        )
        .bind(policy.user.as_db())
        .bind(policy.timeout_millis)
        .bind(i64::from(policy.biometrics_allowed))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Delete a protected package. Returns `false` if it was not protected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, user: UserId, package_name: &str) -> Result<bool> {
        let affected =
            sqlx::query("DELETE FROM protected_package WHERE user_id = ?1 AND package_name = ?2")
                .bind(user.as_db())
                .bind(package_name)
                .execute(self.db.as_ref())
                .await?
                .rows_affected();

        Ok(affected > 0)
    }

    /// Retrieve one protected package, if present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, user: UserId, package_name: &str) -> Result<Option<ProtectedPackage>> {
        let row: Option<PackageRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ?1 AND package_name = ?2"
        ))
        .bind(user.as_db())
        .bind(package_name)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(PackageRow::into_package).transpose()
    }

    /// List a user's protected packages in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<ProtectedPackage>> {
        let rows: Vec<PackageRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY seq"))
                .bind(user.as_db())
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(PackageRow::into_package).collect()
    }

    /// List every protected package across users.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<ProtectedPackage>> {
        let rows: Vec<PackageRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY seq"))
            .fetch_all(self.db.as_ref())
            .await?;

        rows.into_iter().map(PackageRow::into_package).collect()
    }

    /// Names of a user's packages hidden from the launcher, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_hidden(&self, user: UserId) -> Result<Vec<String>> {
        let names: Vec<(String,)> = sqlx::query_as(
            "SELECT package_name FROM protected_package
             WHERE user_id = ?1 AND hidden = 1 ORDER BY seq",
        )
        .bind(user.as_db())
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    /// Set notification redaction. Returns `false` if the package is not protected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_redact_notification(
        &self,
        user: UserId,
        package_name: &str,
        redact: bool,
    ) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE protected_package SET redact_notification = ?1
             WHERE user_id = ?2 AND package_name = ?3",
        )
        .bind(i64::from(redact))
        .bind(user.as_db())
        .bind(package_name)
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        Ok(affected > 0)
    }

    /// Set launcher visibility. Returns `false` if the package is not protected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_hidden(&self, user: UserId, package_name: &str, hidden: bool) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE protected_package SET hidden = ?1
             WHERE user_id = ?2 AND package_name = ?3",
        )
        .bind(i64::from(hidden))
        .bind(user.as_db())
        .bind(package_name)
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        Ok(affected > 0)
    }
}
