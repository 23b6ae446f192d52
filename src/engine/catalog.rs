//! Installed-package lookup.
//!
//! The package manager is an external collaborator; the engine only needs
//! to know whether a package is installed for a user, whether it is a
//! system app, and what label to show in the credential UI.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::CatalogMode;
use crate::models::UserId;

/// What the engine knows about an installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PackageInfo {
    /// Android package name.
    pub package_name: String,
    /// Human-readable application label.
    pub label: String,
    /// Whether the package ships with the system image.
    #[serde(default)]
    pub system: bool,
}

impl PackageInfo {
    /// A user-installed package labelled by its name.
    #[must_use]
    pub fn user_app(package_name: &str) -> Self {
        Self {
            package_name: package_name.to_owned(),
            label: package_name.to_owned(),
            system: false,
        }
    }
}

/// Source of installed-package information.
pub trait PackageCatalog: Send + Sync {
    /// Look up `package_name` as installed for `user`.
    fn resolve(&self, user: UserId, package_name: &str) -> Option<PackageInfo>;

    /// Record that `info` is installed for `user`.
    fn record_installed(&self, user: UserId, info: PackageInfo);

    /// Record that `package_name` was uninstalled for `user`.
    fn record_removed(&self, user: UserId, package_name: &str);
}

/// Catalog kept up to date by package manager broadcasts over IPC.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    mode: CatalogMode,
    packages: RwLock<HashMap<(UserId, String), PackageInfo>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new(mode: CatalogMode) -> Self {
        Self {
            mode,
            packages: RwLock::new(HashMap::new()),
        }
    }
}

impl PackageCatalog for InMemoryCatalog {
    fn resolve(&self, user: UserId, package_name: &str) -> Option<PackageInfo> {
        let known = self
            .packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user, package_name.to_owned()))
            .cloned();

        match (known, self.mode) {
            (Some(info), _) => Some(info),
            (None, CatalogMode::Open) => Some(PackageInfo::user_app(package_name)),
            (None, CatalogMode::Strict) => None,
        }
    }

    fn record_installed(&self, user: UserId, info: PackageInfo) {
        self.packages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((user, info.package_name.clone()), info);
    }

    fn record_removed(&self, user: UserId, package_name: &str) {
        self.packages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(user, package_name.to_owned()));
    }
}
