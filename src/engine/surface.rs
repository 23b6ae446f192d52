//! Outbound channel to the credential surface.
//!
//! The credential surface is the out-of-process UI that collects a PIN,
//! pattern or biometric and reports pass/fail. The engine only emits an
//! [`UnlockRequest`] through a [`CredentialSurface`] and later receives the
//! result through the broker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::UserId;
use crate::{AppError, Result};

/// Queue depth for unlock requests awaiting a slow credential UI.
const REQUEST_CAPACITY: usize = 64;

/// Request for the credential surface to authenticate the user for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UnlockRequest {
    /// Identifier echoed back with the authentication result.
    pub request_id: Uuid,
    /// User to authenticate.
    pub user: UserId,
    /// Package being unlocked.
    pub package_name: String,
    /// Whether biometric factors may be offered.
    pub allow_biometrics: bool,
    /// Human-readable label of the package.
    pub package_label: String,
}

/// Destination for unlock requests.
pub trait CredentialSurface: Send + Sync {
    /// Ask the surface to start a credential flow for `request`.
    ///
    /// Must not wait for the user; the result arrives asynchronously.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Surface`] if the request cannot be delivered.
    fn launch(
        &self,
        request: UnlockRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Credential surface fed to IPC subscribers.
///
/// Each user has its own channel: a credential UI subscribes for one user
/// and only receives that user's requests. Launching when the target user
/// has no subscriber fails, so the package falls back to `Locked`
/// immediately.
#[derive(Clone, Default)]
pub struct BroadcastSurface {
    channels: Arc<Mutex<HashMap<UserId, broadcast::Sender<UnlockRequest>>>>,
}

impl BroadcastSurface {
    /// Create a surface with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<UserId, broadcast::Sender<UnlockRequest>>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a credential UI for `user`.
    #[must_use]
    pub fn subscribe(&self, user: UserId) -> broadcast::Receiver<UnlockRequest> {
        self.channels()
            .entry(user)
            .or_insert_with(|| broadcast::channel(REQUEST_CAPACITY).0)
            .subscribe()
    }

    /// Number of credential UIs connected for `user`.
    #[must_use]
    pub fn subscriber_count(&self, user: UserId) -> usize {
        self.channels()
            .get(&user)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl CredentialSurface for BroadcastSurface {
    fn launch(
        &self,
        request: UnlockRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let user = request.user;
            let request_id = request.request_id;
            let sent = {
                let mut channels = self.channels();
                let sent = channels.get(&user).map(|tx| tx.send(request));
                if matches!(sent, Some(Err(_))) {
                    // Every UI of this user hung up.
                    channels.remove(&user);
                }
                sent
            };
            match sent {
                Some(Ok(delivered)) => {
                    debug!(%user, %request_id, delivered, "unlock request broadcast");
                    Ok(())
                }
                _ => Err(AppError::Surface(format!(
                    "no credential surface is subscribed for user {user}"
                ))),
            }
        })
    }
}
