//! Wire protocol between `app-lock` and its clients.
//!
//! One JSON object per line in each direction. A request line is an
//! [`Envelope`]: the caller's token next to a [`Request`] tagged by
//! `command`.
//!
//! ```json
//! {"auth_token": "...", "command": "add_package", "package_name": "com.example.app"}
//! {"auth_token": "...", "command": "set_timeout", "timeout_millis": 30000}
//! {"auth_token": "...", "command": "authentication_result", "package_name": "com.example.app", "request_id": "...", "success": true}
//! ```
//!
//! Every request gets exactly one [`Response`]:
//!
//! ```json
//! {"ok": true, "data": "locked"}
//! {"ok": false, "error": {"kind": "not_protected", "message": "..."}}
//! ```
//!
//! The two `subscribe_*` commands turn the connection into a stream: after
//! the acknowledging response the server writes one [`Event`] per line
//! until either side hangs up.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::surface::UnlockRequest;
use crate::models::lock::{LockEvent, LockState};
use crate::{AppError, Result};

/// Command sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Protect a package.
    AddPackage {
        /// Android package name.
        package_name: String,
    },
    /// Unprotect a package.
    RemovePackage {
        /// Android package name.
        package_name: String,
    },
    /// Read the re-lock timeout.
    GetTimeout,
    /// Change the re-lock timeout.
    SetTimeout {
        /// New timeout in milliseconds.
        timeout_millis: i64,
    },
    /// List protected packages.
    GetPackageData,
    /// Toggle notification redaction for a package.
    SetShouldRedactNotification {
        /// Android package name.
        package_name: String,
        /// Whether to redact.
        redact: bool,
    },
    /// Toggle biometric unlock.
    SetBiometricsAllowed {
        /// Whether biometrics are allowed.
        allowed: bool,
    },
    /// Read the biometrics flag.
    IsBiometricsAllowed,
    /// Unlock after out-of-band authentication.
    UnlockPackage {
        /// Android package name.
        package_name: String,
    },
    /// Toggle launcher visibility.
    SetPackageHidden {
        /// Android package name.
        package_name: String,
        /// Whether to hide.
        hidden: bool,
    },
    /// List launcher-hidden packages.
    GetHiddenPackages,
    /// Read a package's lock state.
    CheckLocked {
        /// Android package name.
        package_name: String,
    },
    /// Every protected package of the caller's user with its lock state.
    LockStates,
    /// Start a credential flow.
    RequestUnlock {
        /// Android package name.
        package_name: String,
        /// Whether the caller would accept biometrics.
        #[serde(default = "default_true")]
        allow_biometrics: bool,
    },
    /// Credential flow verdict from the credential UI.
    AuthenticationResult {
        /// Android package name.
        package_name: String,
        /// Flow identifier from the unlock request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
        /// Whether the user authenticated.
        success: bool,
    },
    /// Re-lock an unlocked package now.
    RelockPackage {
        /// Android package name.
        package_name: String,
    },
    /// Device lock or screen off.
    DeviceLocked,
    /// A package was installed.
    PackageInstalled {
        /// Android package name.
        package_name: String,
        /// Application label; defaults to the package name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        /// Whether it ships with the system image.
        #[serde(default)]
        system: bool,
    },
    /// A package was uninstalled.
    PackageRemoved {
        /// Android package name.
        package_name: String,
    },
    /// The caller's user was removed.
    UserRemoved,
    /// Whether notifications of a package must be redacted now.
    ShouldRedactNotification {
        /// Android package name.
        package_name: String,
    },
    /// Stream unlock requests for the caller's user.
    SubscribeUnlockRequests,
    /// Stream lock state changes for the caller's user.
    SubscribeLockEvents,
}

fn default_true() -> bool {
    true
}

impl Request {
    /// Wire name of the command, used in log fields.
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::AddPackage { .. } => "add_package",
            Self::RemovePackage { .. } => "remove_package",
            Self::GetTimeout => "get_timeout",
            Self::SetTimeout { .. } => "set_timeout",
            Self::GetPackageData => "get_package_data",
            Self::SetShouldRedactNotification { .. } => "set_should_redact_notification",
            Self::SetBiometricsAllowed { .. } => "set_biometrics_allowed",
            Self::IsBiometricsAllowed => "is_biometrics_allowed",
            Self::UnlockPackage { .. } => "unlock_package",
            Self::SetPackageHidden { .. } => "set_package_hidden",
            Self::GetHiddenPackages => "get_hidden_packages",
            Self::CheckLocked { .. } => "check_locked",
            Self::LockStates => "lock_states",
            Self::RequestUnlock { .. } => "request_unlock",
            Self::AuthenticationResult { .. } => "authentication_result",
            Self::RelockPackage { .. } => "relock_package",
            Self::DeviceLocked => "device_locked",
            Self::PackageInstalled { .. } => "package_installed",
            Self::PackageRemoved { .. } => "package_removed",
            Self::UserRemoved => "user_removed",
            Self::ShouldRedactNotification { .. } => "should_redact_notification",
            Self::SubscribeUnlockRequests => "subscribe_unlock_requests",
            Self::SubscribeLockEvents => "subscribe_lock_events",
        }
    }
}

/// A request line: caller token plus the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Shared-secret token identifying the caller.
    #[serde(default)]
    pub auth_token: String,
    /// The command.
    #[serde(flatten)]
    pub request: Request,
}

/// Error carried by a failed [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, see [`AppError::kind`].
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

/// Reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful reply carrying `data`.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed reply for `err`.
    #[must_use]
    pub fn failure(err: &AppError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: err.kind().to_owned(),
                message: err.message().to_owned(),
            }),
        }
    }

    /// Serialize `value` into a successful reply.
    #[must_use]
    pub fn from_serialize<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(&AppError::from(err)),
        }
    }

    /// Decode the payload, or rebuild the remote error.
    ///
    /// # Errors
    ///
    /// Returns the remote error mapped back to its [`AppError`] variant, or
    /// `AppError::Ipc` if the payload does not decode as `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if self.ok {
            let data = self.data.unwrap_or(Value::Null);
            return Ok(serde_json::from_value(data)?);
        }
        match self.error {
            Some(body) => Err(AppError::from_kind(&body.kind, body.message)),
            None => Err(AppError::Ipc("failed response carried no error".into())),
        }
    }
}

/// One row of the `lock_states` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLockState {
    /// Android package name.
    pub package_name: String,
    /// Current lock state.
    pub state: LockState,
}

/// Streamed after a `subscribe_*` command is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The credential UI should authenticate the user.
    UnlockRequest(UnlockRequest),
    /// A package changed lock state.
    LockChanged(LockEvent),
}
