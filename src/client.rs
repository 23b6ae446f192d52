//! Blocking client for the app lock IPC server.
//!
//! An [`AppLockClient`] owns one connection and one caller token. It is
//! constructed explicitly and passed to whoever needs it. Calls are never
//! retried: a transport failure fails that call and the caller decides
//! what to do next.

use std::io::{BufRead, BufReader, Read, Write};

use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::engine::broker::UnlockOutcome;
use crate::engine::catalog::PackageInfo;
use crate::ipc::codec::MAX_LINE_BYTES;
use crate::ipc::protocol::{Envelope, Event, PackageLockState, Request, Response};
use crate::models::lock::LockState;
use crate::models::package::ProtectedPackage;
use crate::{AppError, Result};

/// Connection to a running `app-lock` server.
pub struct AppLockClient {
    reader: BufReader<Stream>,
    auth_token: String,
}

impl AppLockClient {
    /// Connect to the server listening on `ipc_name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the socket cannot be reached.
    pub fn connect(ipc_name: &str, auth_token: impl Into<String>) -> Result<Self> {
        let name = ipc_name
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{ipc_name}': {err}")))?;
        let stream = Stream::connect(name)
            .map_err(|err| AppError::Ipc(format!("failed to connect to '{ipc_name}': {err}")))?;

        Ok(Self {
            reader: BufReader::new(stream),
            auth_token: auth_token.into(),
        })
    }

    fn send(&mut self, request: Request) -> Result<Response> {
        let envelope = Envelope {
            auth_token: self.auth_token.clone(),
            request,
        };
        let mut request_line = serde_json::to_string(&envelope)?;
        request_line.push('\n');

        let stream = self.reader.get_mut();
        stream
            .write_all(request_line.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|err| AppError::Ipc(format!("failed to send request: {err}")))?;

        let line = read_line(&mut self.reader)?
            .ok_or_else(|| AppError::Ipc("server closed the connection".into()))?;
        Ok(serde_json::from_str(&line)?)
    }

    fn call<T: DeserializeOwned>(&mut self, request: Request) -> Result<T> {
        self.send(request)?.into_result()
    }

    /// Protect a package.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn add_package(&mut self, package_name: &str) -> Result<ProtectedPackage> {
        self.call(Request::AddPackage {
            package_name: package_name.to_owned(),
        })
    }

    /// Unprotect a package.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn remove_package(&mut self, package_name: &str) -> Result<()> {
        self.call(Request::RemovePackage {
            package_name: package_name.to_owned(),
        })
    }

    /// Re-lock timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn get_timeout(&mut self) -> Result<i64> {
        self.call(Request::GetTimeout)
    }

    /// Change the re-lock timeout.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn set_timeout(&mut self, timeout_millis: i64) -> Result<()> {
        self.call(Request::SetTimeout { timeout_millis })
    }

    /// Protected packages in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn get_package_data(&mut self) -> Result<Vec<ProtectedPackage>> {
        self.call(Request::GetPackageData)
    }

    /// Toggle notification redaction.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn set_should_redact_notification(&mut self, package_name: &str, redact: bool) -> Result<()> {
        self.call(Request::SetShouldRedactNotification {
            package_name: package_name.to_owned(),
            redact,
        })
    }

    /// Toggle biometric unlock.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn set_biometrics_allowed(&mut self, allowed: bool) -> Result<()> {
        self.call(Request::SetBiometricsAllowed { allowed })
    }

    /// Whether biometrics are allowed.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn is_biometrics_allowed(&mut self) -> Result<bool> {
        self.call(Request::IsBiometricsAllowed)
    }

    /// Unlock after out-of-band authentication.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn unlock_package(&mut self, package_name: &str) -> Result<()> {
        self.call(Request::UnlockPackage {
            package_name: package_name.to_owned(),
        })
    }

    /// Hide or show a package in the launcher.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn set_package_hidden(&mut self, package_name: &str, hidden: bool) -> Result<()> {
        self.call(Request::SetPackageHidden {
            package_name: package_name.to_owned(),
            hidden,
        })
    }

    /// Launcher-hidden packages.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn get_hidden_packages(&mut self) -> Result<Vec<String>> {
        self.call(Request::GetHiddenPackages)
    }

    /// Lock state of a package.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn check_locked(&mut self, package_name: &str) -> Result<LockState> {
        self.call(Request::CheckLocked {
            package_name: package_name.to_owned(),
        })
    }

    /// Every protected package with its lock state.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn lock_states(&mut self) -> Result<Vec<PackageLockState>> {
        self.call(Request::LockStates)
    }

    /// Start a credential flow.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn request_unlock(&mut self, package_name: &str, allow_biometrics: bool) -> Result<UnlockOutcome> {
        self.call(Request::RequestUnlock {
            package_name: package_name.to_owned(),
            allow_biometrics,
        })
    }

    /// Report a credential flow verdict. Returns whether it was applied.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn report_authentication_result(
        &mut self,
        package_name: &str,
        request_id: Option<Uuid>,
        success: bool,
    ) -> Result<bool> {
        self.call(Request::AuthenticationResult {
            package_name: package_name.to_owned(),
            request_id,
            success,
        })
    }

    /// Re-lock an unlocked package.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn relock_package(&mut self, package_name: &str) -> Result<bool> {
        self.call(Request::RelockPackage {
            package_name: package_name.to_owned(),
        })
    }

    /// Signal device lock. Returns how many packages were re-locked.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn device_locked(&mut self) -> Result<usize> {
        self.call(Request::DeviceLocked)
    }

    /// Report an installed package.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn package_installed(&mut self, info: PackageInfo) -> Result<()> {
        self.call(Request::PackageInstalled {
            package_name: info.package_name,
            label: Some(info.label),
            system: info.system,
        })
    }

    /// Report an uninstalled package. Returns whether it had been protected.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn package_removed(&mut self, package_name: &str) -> Result<bool> {
        self.call(Request::PackageRemoved {
            package_name: package_name.to_owned(),
        })
    }

    /// Report removal of the caller's user.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn user_removed(&mut self) -> Result<u64> {
        self.call(Request::UserRemoved)
    }

    /// Whether notifications of a package must be redacted now.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn should_redact_notification(&mut self, package_name: &str) -> Result<bool> {
        self.call(Request::ShouldRedactNotification {
            package_name: package_name.to_owned(),
        })
    }

    /// Turn this connection into a feed of unlock requests.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn subscribe_unlock_requests(self) -> Result<EventStream> {
        self.subscribe(Request::SubscribeUnlockRequests)
    }

    /// Turn this connection into a feed of lock state changes.
    ///
    /// # Errors
    ///
    /// Returns the server's error or a transport error.
    pub fn subscribe_lock_events(self) -> Result<EventStream> {
        self.subscribe(Request::SubscribeLockEvents)
    }

    fn subscribe(mut self, request: Request) -> Result<EventStream> {
        self.call::<serde_json::Value>(request)?;
        Ok(EventStream {
            reader: self.reader,
        })
    }
}

/// Events pushed by the server after a subscription.
pub struct EventStream {
    reader: BufReader<Stream>,
}

impl Iterator for EventStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        match read_line(&mut self.reader) {
            Ok(Some(line)) => Some(serde_json::from_str(&line).map_err(AppError::from)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Next non-empty line, or `None` at end of stream.
///
/// Lines longer than [`MAX_LINE_BYTES`] fail instead of growing the buffer.
fn read_line(reader: &mut BufReader<Stream>) -> Result<Option<String>> {
    let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .by_ref()
            .take(limit.saturating_add(1))
            .read_line(&mut line)
            .map_err(|err| AppError::Ipc(format!("failed to read response: {err}")))?;
        if read == 0 {
            return Ok(None);
        }
        if read > MAX_LINE_BYTES && !line.ends_with('\n') {
            return Err(AppError::Ipc(format!(
                "response line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        if !line.trim().is_empty() {
            return Ok(Some(line.trim().to_owned()));
        }
    }
}
