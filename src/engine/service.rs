//! App lock façade: authorization, user scoping, and dispatch.
//!
//! Every entry point takes the authenticated [`Caller`] first and checks
//! its grant before touching any state. All operations act on the
//! caller's own user. Mutations persist first and only then update the
//! tracker, both under the package's [`KeyGuard`](super::tracker::KeyGuard)
//! so the two never disagree.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::models::caller::{Caller, Permission};
use crate::models::lock::{LockEvent, LockKey, LockState};
use crate::models::package::ProtectedPackage;
use crate::models::UserId;
use crate::{AppError, Result};

use super::broker::{AuthenticationBroker, UnlockOutcome, UnlockParams};
use super::catalog::{PackageCatalog, PackageInfo};
use super::store::PolicyStore;
use super::tracker::LockStateTracker;

/// Android package name syntax: at least two dot-separated segments.
const PACKAGE_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]*(\.[A-Za-z][A-Za-z0-9_]*)+$";

/// Operations exposed by the façade, used for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Protect a package.
    AddPackage,
    /// Unprotect a package.
    RemovePackage,
    /// Read the re-lock timeout.
    GetTimeout,
    /// Change the re-lock timeout.
    SetTimeout,
    /// List protected packages.
    GetPackageData,
    /// Toggle notification redaction.
    SetShouldRedactNotification,
    /// Toggle biometrics.
    SetBiometricsAllowed,
    /// Read the biometrics flag.
    IsBiometricsAllowed,
    /// Unlock after out-of-band authentication.
    UnlockPackage,
    /// Toggle launcher visibility.
    SetPackageHidden,
    /// List launcher-hidden packages.
    GetHiddenPackages,
    /// Read a package's lock state.
    CheckLocked,
    /// Start a credential flow.
    RequestUnlock,
    /// Report a credential flow verdict.
    AuthenticationResult,
    /// Re-lock an unlocked package.
    RelockPackage,
    /// Device lock or screen-off signal.
    DeviceLocked,
    /// Package manager install signal.
    PackageInstalled,
    /// Package manager uninstall signal.
    PackageRemoved,
    /// User removal signal.
    UserRemoved,
    /// Notification redaction query.
    ShouldRedactNotification,
    /// Snapshot of the user's lock states.
    LockStates,
    /// Stream unlock requests to a credential UI.
    SubscribeUnlockRequests,
    /// Stream lock state changes.
    SubscribeLockEvents,
}

impl Operation {
    /// Permission the caller must hold, if any.
    #[must_use]
    pub fn required_permission(self) -> Option<Permission> {
        match self {
            Self::GetTimeout | Self::IsBiometricsAllowed => None,
            _ => Some(Permission::ManageAppLock),
        }
    }
}

/// The application lock policy engine as seen by other subsystems.
pub struct PolicyService {
    store: PolicyStore,
    tracker: LockStateTracker,
    broker: AuthenticationBroker,
    catalog: Arc<dyn PackageCatalog>,
    allowed_system_apps: HashSet<String>,
    package_name: Regex,
}

impl PolicyService {
    /// Assemble the service from its components.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the package-name validator cannot be built.
    pub fn new(
        config: &GlobalConfig,
        store: PolicyStore,
        tracker: LockStateTracker,
        broker: AuthenticationBroker,
        catalog: Arc<dyn PackageCatalog>,
    ) -> Result<Self> {
        let package_name = Regex::new(PACKAGE_NAME_PATTERN)
            .map_err(|err| AppError::Config(format!("invalid package name pattern: {err}")))?;

        Ok(Self {
            store,
            tracker,
            broker,
            catalog,
            allowed_system_apps: config.policy.allowed_system_apps.iter().cloned().collect(),
            package_name,
        })
    }

    /// The runtime lock state tracker.
    #[must_use]
    pub fn tracker(&self) -> &LockStateTracker {
        &self.tracker
    }

    /// Check `caller` may perform `operation`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PermissionDenied` if a required grant is missing.
    pub fn authorize(&self, caller: &Caller, operation: Operation) -> Result<()> {
        match operation.required_permission() {
            Some(permission) if !caller.holds(permission) => {
                warn!(caller = %caller.name, ?operation, "permission denied");
                Err(AppError::PermissionDenied(format!(
                    "{} requires {}",
                    caller.name,
                    permission.as_str()
                )))
            }
            _ => Ok(()),
        }
    }

    fn key(&self, caller: &Caller, package_name: &str) -> Result<LockKey> {
        if !self.package_name.is_match(package_name) {
            return Err(AppError::InvalidArgument(format!(
                "invalid package name: {package_name:?}"
            )));
        }
        Ok(LockKey::new(caller.user, package_name))
    }

    /// Load every persisted package into the tracker as `Locked`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for entry in self.store.all_packages().await? {
            let key = LockKey::new(entry.user, entry.package_name);
            if self.tracker.lock_key(&key).await.protect() {
                restored += 1;
            }
        }
        info!(restored, "protected packages restored as locked");
        Ok(restored)
    }

    /// Protect a package for the caller's user.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument` (bad name or system app
    /// not allowed), `NotFound` (not installed), or `AlreadyProtected`.
    pub async fn add_package(&self, caller: &Caller, package_name: &str) -> Result<ProtectedPackage> {
        self.authorize(caller, Operation::AddPackage)?;
        let key = self.key(caller, package_name)?;

        let info = self.catalog.resolve(key.user, package_name).ok_or_else(|| {
            AppError::NotFound(format!(
                "{package_name} is not installed for user {}",
                key.user
            ))
        })?;
        if info.system && !self.allowed_system_apps.contains(package_name) {
            return Err(AppError::InvalidArgument(format!(
                "system app {package_name} may not be protected"
            )));
        }

        let mut guard = self.tracker.lock_key(&key).await;
        let entry = self.store.add_package(key.user, package_name).await?;
        guard.protect();
        info!(%key, caller = %caller.name, "package protected");
        Ok(entry)
    }

    /// Stop protecting a package; cancels any pending credential flow.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn remove_package(&self, caller: &Caller, package_name: &str) -> Result<()> {
        self.authorize(caller, Operation::RemovePackage)?;
        let key = self.key(caller, package_name)?;
        self.unprotect(&key).await?;
        info!(%key, caller = %caller.name, "package unprotected");
        Ok(())
    }

    async fn unprotect(&self, key: &LockKey) -> Result<()> {
        let mut guard = self.tracker.lock_key(key).await;
        self.store.remove_package(key.user, &key.package).await?;
        if let Some(flow) = guard.unprotect() {
            info!(%key, request_id = %flow, "pending credential flow abandoned");
        }
        Ok(())
    }

    /// Re-lock timeout of the caller's user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn get_timeout(&self, caller: &Caller) -> Result<i64> {
        self.authorize(caller, Operation::GetTimeout)?;
        self.store.get_timeout(caller.user).await
    }

    /// Change the re-lock timeout of the caller's user.
    ///
    /// Timers already armed keep their original deadline.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn set_timeout(&self, caller: &Caller, timeout_millis: i64) -> Result<()> {
        self.authorize(caller, Operation::SetTimeout)?;
        self.store.set_timeout(caller.user, timeout_millis).await?;
        info!(user = %caller.user, timeout_millis, "re-lock timeout updated");
        Ok(())
    }

    /// Protected packages of the caller's user in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `AppError::Db`.
    pub async fn get_package_data(&self, caller: &Caller) -> Result<Vec<ProtectedPackage>> {
        self.authorize(caller, Operation::GetPackageData)?;
        self.store.get_package_data(caller.user).await
    }

    /// Toggle notification redaction for a protected package.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn set_should_redact_notification(
        &self,
        caller: &Caller,
        package_name: &str,
        redact: bool,
    ) -> Result<()> {
        self.authorize(caller, Operation::SetShouldRedactNotification)?;
        let key = self.key(caller, package_name)?;
        self.store
            .set_should_redact_notification(key.user, &key.package, redact)
            .await
    }

    /// Toggle biometric unlock for the caller's user.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `NotProtected`.
    pub async fn set_biometrics_allowed(&self, caller: &Caller, allowed: bool) -> Result<()> {
        self.authorize(caller, Operation::SetBiometricsAllowed)?;
        self.store.set_biometrics_allowed(caller.user, allowed).await
    }

    /// Whether the caller's user allows biometric unlock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn is_biometrics_allowed(&self, caller: &Caller) -> Result<bool> {
        self.authorize(caller, Operation::IsBiometricsAllowed)?;
        self.store.is_biometrics_allowed(caller.user).await
    }

    /// Unlock a package after the caller authenticated the user out of band.
    ///
    /// Supersedes a pending credential flow if one is outstanding.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn unlock_package(&self, caller: &Caller, package_name: &str) -> Result<()> {
        self.authorize(caller, Operation::UnlockPackage)?;
        let key = self.key(caller, package_name)?;
        let relock_after = self.store.relock_delay(key.user).await?;

        let mut guard = self.tracker.lock_key(&key).await;
        if let Some(superseded) = guard.unlock(relock_after)? {
            info!(%key, request_id = %superseded, "pending credential flow superseded");
        }
        info!(%key, caller = %caller.name, relock_ms = relock_after.as_millis(), "package unlocked");
        Ok(())
    }

    /// Hide or show a protected package in the launcher.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn set_package_hidden(
        &self,
        caller: &Caller,
        package_name: &str,
        hidden: bool,
    ) -> Result<()> {
        self.authorize(caller, Operation::SetPackageHidden)?;
        let key = self.key(caller, package_name)?;
        self.store
            .set_package_hidden(key.user, &key.package, hidden)
            .await
    }

    /// Packages of the caller's user hidden from the launcher.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `AppError::Db`.
    pub async fn get_hidden_packages(&self, caller: &Caller) -> Result<Vec<String>> {
        self.authorize(caller, Operation::GetHiddenPackages)?;
        self.store.get_hidden_packages(caller.user).await
    }

    /// Current lock state of a package. Has no side effects.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn check_locked(&self, caller: &Caller, package_name: &str) -> Result<LockState> {
        self.authorize(caller, Operation::CheckLocked)?;
        let key = self.key(caller, package_name)?;
        self.tracker
            .state(&key)
            .await
            .ok_or_else(|| AppError::NotProtected(format!("{key} is not protected")))
    }

    /// Start a credential flow for a locked package.
    ///
    /// Returns without waiting for the user.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, `NotProtected`,
    /// `AlreadyPending`, or `Surface`.
    pub async fn request_unlock(
        &self,
        caller: &Caller,
        package_name: &str,
        allow_biometrics: bool,
    ) -> Result<UnlockOutcome> {
        self.authorize(caller, Operation::RequestUnlock)?;
        let key = self.key(caller, package_name)?;

        let biometrics = allow_biometrics && self.store.is_biometrics_allowed(key.user).await?;
        let package_label = self
            .catalog
            .resolve(key.user, package_name)
            .map_or_else(|| package_name.to_owned(), |info| info.label);
        let relock_after = self.store.relock_delay(key.user).await?;

        self.broker
            .request_unlock(
                &key,
                UnlockParams {
                    allow_biometrics: biometrics,
                    package_label,
                    relock_after,
                },
            )
            .await
    }

    /// Deliver a credential flow verdict. Returns whether it was applied.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `InvalidArgument`.
    pub async fn report_authentication_result(
        &self,
        caller: &Caller,
        package_name: &str,
        request_id: Option<Uuid>,
        success: bool,
    ) -> Result<bool> {
        self.authorize(caller, Operation::AuthenticationResult)?;
        let key = self.key(caller, package_name)?;
        Ok(self
            .broker
            .on_authentication_result(&key, request_id, success)
            .await)
    }

    /// Re-lock an unlocked package now. Returns whether it was unlocked.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `NotProtected`.
    pub async fn relock_package(&self, caller: &Caller, package_name: &str) -> Result<bool> {
        self.authorize(caller, Operation::RelockPackage)?;
        let key = self.key(caller, package_name)?;
        self.tracker.relock(&key).await
    }

    /// Device lock or screen-off: re-lock all of the caller's user's packages.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`.
    pub async fn device_locked(&self, caller: &Caller) -> Result<usize> {
        self.authorize(caller, Operation::DeviceLocked)?;
        Ok(self.tracker.lock_user(caller.user).await)
    }

    /// Package manager reports an install for the caller's user.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `InvalidArgument`.
    pub fn package_installed(&self, caller: &Caller, info: PackageInfo) -> Result<()> {
        self.authorize(caller, Operation::PackageInstalled)?;
        self.key(caller, &info.package_name)?;
        self.catalog.record_installed(caller.user, info);
        Ok(())
    }

    /// Package manager reports an uninstall; drops protection if present.
    ///
    /// Returns whether the package had been protected.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `AppError::Db`.
    pub async fn package_removed(&self, caller: &Caller, package_name: &str) -> Result<bool> {
        self.authorize(caller, Operation::PackageRemoved)?;
        let key = self.key(caller, package_name)?;
        self.catalog.record_removed(key.user, package_name);

        match self.unprotect(&key).await {
            Ok(()) => {
                info!(%key, "uninstalled package unprotected");
                Ok(true)
            }
            Err(AppError::NotProtected(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The caller's user was removed: purge its records and runtime state.
    ///
    /// Returns how many packages were unprotected.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `AppError::Db`.
    pub async fn user_removed(&self, caller: &Caller) -> Result<u64> {
        self.authorize(caller, Operation::UserRemoved)?;
        let purged = self.store.remove_user(caller.user).await?;
        self.reconcile_user(caller.user).await?;
        info!(user = %caller.user, purged, "user app lock data purged");
        Ok(purged)
    }

    /// Drop runtime state for every tracked key of `user` no longer persisted.
    async fn reconcile_user(&self, user: UserId) -> Result<()> {
        for key in self.tracker.keys_for_user(user) {
            let mut guard = self.tracker.lock_key(&key).await;
            if guard.state().is_some() && !self.store.is_protected(user, &key.package).await? {
                guard.unprotect();
            }
        }
        Ok(())
    }

    /// Whether notification content of a package must be hidden right now.
    ///
    /// Unprotected packages are never redacted.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvalidArgument`, or `AppError::Db`.
    pub async fn should_redact_notification(
        &self,
        caller: &Caller,
        package_name: &str,
    ) -> Result<bool> {
        self.authorize(caller, Operation::ShouldRedactNotification)?;
        let key = self.key(caller, package_name)?;
        let entry = match self.store.get_package(key.user, &key.package).await {
            Ok(entry) => entry,
            Err(AppError::NotProtected(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let state = self.tracker.state(&key).await;
        Ok(entry.redact_notification && state != Some(LockState::Unlocked))
    }

    /// Every protected package of the caller's user with its lock state.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`.
    pub async fn lock_states(&self, caller: &Caller) -> Result<Vec<(String, LockState)>> {
        self.authorize(caller, Operation::LockStates)?;
        Ok(self.tracker.snapshot(caller.user).await)
    }

    /// Subscribe to lock state changes. Events of other users must be
    /// filtered out by the receiver.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`.
    pub fn subscribe_lock_events(&self, caller: &Caller) -> Result<broadcast::Receiver<LockEvent>> {
        self.authorize(caller, Operation::SubscribeLockEvents)?;
        Ok(self.tracker.subscribe())
    }
}
