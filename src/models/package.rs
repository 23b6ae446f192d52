//! Protected package entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Default notification redaction for newly protected packages.
pub const DEFAULT_REDACT_NOTIFICATION: bool = false;

/// Default launcher visibility for newly protected packages.
pub const DEFAULT_HIDE_IN_LAUNCHER: bool = false;

/// A package under app lock protection for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProtectedPackage {
    /// Owning user.
    pub user: UserId,
    /// Android package name.
    pub package_name: String,
    /// Whether notification content is hidden while locked.
    pub redact_notification: bool,
    /// Whether the package is hidden from the launcher.
    pub hidden: bool,
    /// When protection was added.
    pub created_at: DateTime<Utc>,
}

impl ProtectedPackage {
    /// Construct an entry with default settings.
    #[must_use]
    pub fn new(user: UserId, package_name: String) -> Self {
        Self {
            user,
            package_name,
            redact_notification: DEFAULT_REDACT_NOTIFICATION,
            hidden: DEFAULT_HIDE_IN_LAUNCHER,
            created_at: Utc::now(),
        }
    }
}
