//! Caller identity and permission grants.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Permissions a caller may hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Manage protected packages and unlock them (`MANAGE_APP_LOCK`).
    ManageAppLock,
}

impl Permission {
    /// Platform permission string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManageAppLock => "com.android.permission.MANAGE_APP_LOCK",
        }
    }
}

/// Authenticated identity of an IPC caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Human-readable caller name from configuration.
    pub name: String,
    /// User the caller acts for. Operations are scoped to this user.
    pub user: UserId,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
}

impl Caller {
    /// Build a caller identity.
    #[must_use]
    pub fn new(name: impl Into<String>, user: UserId, permissions: Vec<Permission>) -> Self {
        Self {
            name: name.into(),
            user,
            permissions,
        }
    }

    /// Whether the caller holds `permission`.
    #[must_use]
    pub fn holds(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}
