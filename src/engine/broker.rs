//! Authentication broker between the tracker and the credential surface.
//!
//! [`AuthenticationBroker::request_unlock`] moves a `Locked` package to
//! `PendingAuthentication`, registers the flow, and hands an
//! [`UnlockRequest`] to the [`CredentialSurface`]. It returns as soon as the
//! request is delivered. The outcome arrives later through
//! [`AuthenticationBroker::on_authentication_result`], or a watchdog
//! expires the flow after the configured bound.
//!
//! The flow itself is stored in the package's tracker slot, so every step
//! here is serialized per key and unrelated packages never contend.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::lock::{LockKey, LockState};
use crate::{AppError, Result};

use super::surface::{CredentialSurface, UnlockRequest};
use super::tracker::LockStateTracker;

/// Result of [`AuthenticationBroker::request_unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UnlockOutcome {
    /// A credential flow was started.
    Started {
        /// Identifier the credential surface echoes back.
        request_id: Uuid,
    },
    /// The package is already unlocked; nothing to do.
    AlreadyUnlocked,
}

/// Parameters of one unlock request.
#[derive(Debug, Clone)]
pub struct UnlockParams {
    /// Whether biometrics may be offered, already AND-ed with user policy.
    pub allow_biometrics: bool,
    /// Human-readable package label.
    pub package_label: String,
    /// Re-lock delay armed on success.
    pub relock_after: Duration,
}

/// Mediates credential flows for locked packages.
#[derive(Clone)]
pub struct AuthenticationBroker {
    tracker: LockStateTracker,
    surface: Arc<dyn CredentialSurface>,
    flow_timeout: Duration,
}

impl AuthenticationBroker {
    /// Create a broker driving `tracker` through `surface`.
    #[must_use]
    pub fn new(
        tracker: LockStateTracker,
        surface: Arc<dyn CredentialSurface>,
        flow_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            surface,
            flow_timeout,
        }
    }

    /// Start a credential flow for `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not protected,
    /// `AppError::AlreadyPending` if a flow is outstanding, and
    /// `AppError::Surface` if the credential surface is unreachable (the
    /// package is then `Locked` again).
    pub async fn request_unlock(&self, key: &LockKey, params: UnlockParams) -> Result<UnlockOutcome> {
        let mut guard = self.tracker.lock_key(key).await;
        if guard.state() == Some(LockState::Unlocked) {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }
        let request_id = guard.begin_authentication(params.relock_after)?;

        let request = UnlockRequest {
            request_id,
            user: key.user,
            package_name: key.package.clone(),
            allow_biometrics: params.allow_biometrics,
            package_label: params.package_label,
        };

        if let Err(err) = self.surface.launch(request).await {
            guard.finish_authentication(request_id, false);
            warn!(%key, %request_id, %err, "credential surface launch failed");
            return Err(err);
        }

        if let Some(watchdog) = guard.flow_watchdog() {
            self.spawn_watchdog(key.clone(), request_id, watchdog);
        }
        info!(%key, %request_id, allow_biometrics = params.allow_biometrics, "credential flow started");
        Ok(UnlockOutcome::Started { request_id })
    }

    /// Deliver the credential surface's verdict for `key`.
    ///
    /// When `request_id` is given it must match the outstanding flow.
    /// Results with no matching flow are ignored and logged; returns
    /// whether the result was applied.
    pub async fn on_authentication_result(
        &self,
        key: &LockKey,
        request_id: Option<Uuid>,
        success: bool,
    ) -> bool {
        let mut guard = self.tracker.lock_key(key).await;
        match guard.pending_flow() {
            Some(flow) if request_id.map_or(true, |id| id == flow) => {
                guard.finish_authentication(flow, success);
                info!(%key, request_id = %flow, success, "credential flow resolved");
                true
            }
            _ => {
                warn!(%key, ?request_id, success, "authentication result with no pending flow ignored");
                false
            }
        }
    }

    /// Whether a flow is outstanding for `key`.
    pub async fn is_pending(&self, key: &LockKey) -> bool {
        self.tracker.lock_key(key).await.pending_flow().is_some()
    }

    fn spawn_watchdog(&self, key: LockKey, request_id: Uuid, watchdog: CancellationToken) {
        let tracker = self.tracker.clone();
        let flow_timeout = self.flow_timeout;
        let span = info_span!("auth_flow_watchdog", key = %key, request_id = %request_id);

        tokio::spawn(
            async move {
                tokio::select! {
                    () = watchdog.cancelled() => return,
                    () = tokio::time::sleep(flow_timeout) => {}
                }

                let mut guard = tracker.lock_key(&key).await;
                if guard.finish_authentication(request_id, false) {
                    let err = AppError::AuthenticationTimeout(format!(
                        "authentication timed out after {}s",
                        flow_timeout.as_secs()
                    ));
                    warn!(%err, "credential flow expired; package locked");
                }
            }
            .instrument(span),
        );
    }
}
