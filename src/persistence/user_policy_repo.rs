//! Per-user policy repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::user_policy::UserPolicy;
use crate::models::UserId;
use crate::Result;

use super::db::Database;
use super::package_repo::parse_user_id;

/// Repository wrapper around `SQLite` for user policy records.
#[derive(Clone)]
pub struct UserPolicyRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct UserPolicyRow {
    user_id: i64,
    timeout_millis: i64,
    biometrics_allowed: i64,
}

impl UserPolicyRow {
    fn into_policy(self) -> Result<UserPolicy> {
        Ok(UserPolicy {
            user: parse_user_id(self.user_id)?,
            timeout_millis: self.timeout_millis,
            biometrics_allowed: self.biometrics_allowed != 0,
        })
    }
}

impl UserPolicyRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Retrieve a user's policy, or `None` if the user was never configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, user: UserId) -> Result<Option<UserPolicy>> {
        let row: Option<UserPolicyRow> = sqlx::query_as(
            "SELECT user_id, timeout_millis, biometrics_allowed FROM user_policy WHERE user_id = ?1",
        )
        .bind(user.as_db())
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(UserPolicyRow::into_policy).transpose()
    }

    /// Update the re-lock timeout. Returns `false` if the user is not configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_timeout(&self, user: UserId, timeout_millis: i64) -> Result<bool> {
        let affected = sqlx::query("UPDATE user_policy SET timeout_millis = ?1 WHERE user_id = ?2")
            .bind(timeout_millis)
            .bind(user.as_db())
            .execute(self.db.as_ref())
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    /// Update the biometrics flag. Returns `false` if the user is not configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_biometrics_allowed(&self, user: UserId, allowed: bool) -> Result<bool> {
        let affected =
            sqlx::query("UPDATE user_policy SET biometrics_allowed = ?1 WHERE user_id = ?2")
                .bind(i64::from(allowed))
                .bind(user.as_db())
                .execute(self.db.as_ref())
                .await?
                .rows_affected();

        Ok(affected > 0)
    }

    /// Delete a user's policy and every package they protect, atomically.
    ///
    /// Returns the number of package records removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn purge_user(&self, user: UserId) -> Result<u64> {
        let mut tx = self.db.begin().await?;

        let packages = sqlx::query("DELETE FROM protected_package WHERE user_id = ?1")
            .bind(user.as_db())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM user_policy WHERE user_id = ?1")
            .bind(user.as_db())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(packages)
    }
}
