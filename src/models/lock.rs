//! Runtime lock state model.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::UserId;

/// Runtime lock state of a protected package. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Recently authenticated; a re-lock timer is armed.
    Unlocked,
    /// Access requires fresh authentication.
    Locked,
    /// A credential flow is outstanding.
    PendingAuthentication,
}

impl LockState {
    /// Wire name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::PendingAuthentication => "pending_authentication",
        }
    }
}

impl Display for LockState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one lock slot: a package as seen by one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// Owning user.
    pub user: UserId,
    /// Android package name.
    pub package: String,
}

impl LockKey {
    /// Build a key for `package` under `user`.
    #[must_use]
    pub fn new(user: UserId, package: impl Into<String>) -> Self {
        Self {
            user,
            package: package.into(),
        }
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user, self.package)
    }
}

/// Published by the tracker on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    /// Owning user.
    pub user: UserId,
    /// Android package name.
    pub package: String,
    /// New state; `None` once protection was removed.
    pub state: Option<LockState>,
}
