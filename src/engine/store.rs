//! Durable app lock policy: protected packages and per-user settings.
//!
//! [`PolicyStore`] applies argument validation and precondition checks on
//! top of the `SQLite` repositories. It never touches runtime lock state;
//! the [`PolicyService`](super::service::PolicyService) sequences store
//! writes with tracker transitions.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::PolicyConfig;
use crate::models::package::ProtectedPackage;
use crate::models::user_policy::{TimeoutFallback, UserPolicy, NO_TIMEOUT_CONFIGURED};
use crate::models::UserId;
use crate::persistence::db::Database;
use crate::persistence::package_repo::PackageRepo;
use crate::persistence::user_policy_repo::UserPolicyRepo;
use crate::{AppError, Result};

/// Persisted source of truth for protected-package membership and settings.
#[derive(Clone)]
pub struct PolicyStore {
    packages: PackageRepo,
    policies: UserPolicyRepo,
    min_timeout_millis: i64,
    default_timeout_millis: i64,
    timeout_fallback: TimeoutFallback,
}

impl PolicyStore {
    /// Build a store over `db` using the limits from `policy`.
    #[must_use]
    pub fn new(db: Arc<Database>, policy: &PolicyConfig) -> Self {
        Self {
            packages: PackageRepo::new(Arc::clone(&db)),
            policies: UserPolicyRepo::new(db),
            min_timeout_millis: policy.min_timeout_millis,
            default_timeout_millis: policy.default_timeout_millis,
            timeout_fallback: policy.timeout_fallback,
        }
    }

    /// Protect `package_name` for `user` with default settings.
    ///
    /// The user's policy row is created with defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyProtected` if the package is already protected.
    pub async fn add_package(&self, user: UserId, package_name: &str) -> Result<ProtectedPackage> {
        let entry = ProtectedPackage::new(user, package_name.to_owned());
        let mut policy = UserPolicy::new(user);
        policy.timeout_millis = self.default_timeout_millis;

        if !self.packages.insert(&entry, &policy).await? {
            return Err(AppError::AlreadyProtected(format!(
                "{package_name} is already protected for user {user}"
            )));
        }
        debug!(%user, package = package_name, "protected package persisted");
        Ok(entry)
    }

    /// Stop protecting `package_name` for `user`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not protected.
    pub async fn remove_package(&self, user: UserId, package_name: &str) -> Result<()> {
        if self.packages.delete(user, package_name).await? {
            debug!(%user, package = package_name, "protected package deleted");
            Ok(())
        } else {
            Err(not_protected(user, package_name))
        }
    }

    /// Whether `package_name` is protected for `user`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn is_protected(&self, user: UserId, package_name: &str) -> Result<bool> {
        Ok(self.packages.get(user, package_name).await?.is_some())
    }

    /// One protected package entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not protected.
    pub async fn get_package(&self, user: UserId, package_name: &str) -> Result<ProtectedPackage> {
        self.packages
            .get(user, package_name)
            .await?
            .ok_or_else(|| not_protected(user, package_name))
    }

    /// All of a user's protected packages in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_package_data(&self, user: UserId) -> Result<Vec<ProtectedPackage>> {
        self.packages.list_for_user(user).await
    }

    /// Every protected package across users, used to restore runtime state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn all_packages(&self) -> Result<Vec<ProtectedPackage>> {
        self.packages.list_all().await
    }

    /// Set the user's re-lock timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` if `timeout_millis` is below the
    /// configured minimum, `AppError::NotProtected` if the user has no
    /// configuration yet.
    pub async fn set_timeout(&self, user: UserId, timeout_millis: i64) -> Result<()> {
        if timeout_millis < self.min_timeout_millis {
            return Err(AppError::InvalidArgument(format!(
                "timeout {timeout_millis}ms is below the minimum of {}ms",
                self.min_timeout_millis
            )));
        }

        if self.policies.set_timeout(user, timeout_millis).await? {
            Ok(())
        } else {
            Err(unconfigured(user))
        }
    }

    /// The user's re-lock timeout in milliseconds.
    ///
    /// Unconfigured users get [`NO_TIMEOUT_CONFIGURED`] or the default
    /// timeout, depending on the configured [`TimeoutFallback`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_timeout(&self, user: UserId) -> Result<i64> {
        match self.policies.get(user).await? {
            Some(policy) => Ok(policy.timeout_millis),
            None => Ok(match self.timeout_fallback {
                TimeoutFallback::Sentinel => NO_TIMEOUT_CONFIGURED,
                TimeoutFallback::Default => self.default_timeout_millis,
            }),
        }
    }

    /// Re-lock delay to arm after an unlock, independent of the fallback policy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn relock_delay(&self, user: UserId) -> Result<Duration> {
        let millis = self
            .policies
            .get(user)
            .await?
            .map_or(self.default_timeout_millis, |policy| policy.timeout_millis);
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }

    /// Set whether notification content is redacted while the package is locked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not protected.
    pub async fn set_should_redact_notification(
        &self,
        user: UserId,
        package_name: &str,
        redact: bool,
    ) -> Result<()> {
        if self
            .packages
            .set_redact_notification(user, package_name, redact)
            .await?
        {
            Ok(())
        } else {
            Err(not_protected(user, package_name))
        }
    }

    /// Set whether biometrics may be used to unlock the user's packages.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the user has no configuration yet.
    pub async fn set_biometrics_allowed(&self, user: UserId, allowed: bool) -> Result<()> {
        if self.policies.set_biometrics_allowed(user, allowed).await? {
            Ok(())
        } else {
            Err(unconfigured(user))
        }
    }

    /// Whether biometrics are allowed; unconfigured users get the default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn is_biometrics_allowed(&self, user: UserId) -> Result<bool> {
        Ok(self
            .policies
            .get(user)
            .await?
            .map_or(crate::models::user_policy::DEFAULT_BIOMETRICS_ALLOWED, |p| {
                p.biometrics_allowed
            }))
    }

    /// Hide or show the package in the launcher.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not protected.
    pub async fn set_package_hidden(
        &self,
        user: UserId,
        package_name: &str,
        hidden: bool,
    ) -> Result<()> {
        if self.packages.set_hidden(user, package_name, hidden).await? {
            Ok(())
        } else {
            Err(not_protected(user, package_name))
        }
    }

    /// Names of the user's packages hidden from the launcher.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_hidden_packages(&self, user: UserId) -> Result<Vec<String>> {
        self.packages.list_hidden(user).await
    }

    /// Drop every record of `user`. Returns how many packages were unprotected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn remove_user(&self, user: UserId) -> Result<u64> {
        self.policies.purge_user(user).await
    }
}

fn not_protected(user: UserId, package_name: &str) -> AppError {
    AppError::NotProtected(format!(
        "{package_name} is not protected for user {user}"
    ))
}

fn unconfigured(user: UserId) -> AppError {
    AppError::NotProtected(format!("user {user} has no app lock configuration"))
}
