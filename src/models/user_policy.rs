//! Per-user lock policy model.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Default re-lock timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MILLIS: i64 = 10 * 1000;

/// Default for whether biometrics may be used to unlock.
pub const DEFAULT_BIOMETRICS_ALLOWED: bool = true;

/// Returned by `get_timeout` under [`TimeoutFallback::Sentinel`] when the
/// user has no configuration.
pub const NO_TIMEOUT_CONFIGURED: i64 = -1;

/// User-level settings shared by all of a user's protected packages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct UserPolicy {
    /// Owning user.
    pub user: UserId,
    /// Re-lock delay after a successful unlock.
    pub timeout_millis: i64,
    /// Whether biometric factors are accepted.
    pub biometrics_allowed: bool,
}

impl UserPolicy {
    /// Policy with default values.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            timeout_millis: DEFAULT_TIMEOUT_MILLIS,
            biometrics_allowed: DEFAULT_BIOMETRICS_ALLOWED,
        }
    }
}

/// What `get_timeout` reports for a user without configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutFallback {
    /// Report [`NO_TIMEOUT_CONFIGURED`].
    #[default]
    Sentinel,
    /// Report the configured default timeout.
    Default,
}
