//! Local IPC server for app lock clients.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Each line is an
//! [`Envelope`](super::protocol::Envelope); the token identifies the
//! caller and every command is dispatched to the [`PolicyService`] on its
//! behalf. See [`super::protocol`] for the wire format.

use std::sync::Arc;

use futures_util::StreamExt;
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::engine::catalog::PackageInfo;
use crate::engine::service::{Operation, PolicyService};
use crate::engine::surface::{BroadcastSurface, UnlockRequest};
use crate::models::caller::Caller;
use crate::models::lock::LockEvent;
use crate::models::UserId;
use crate::{AppError, Result};

use super::codec::LineCodec;
use super::protocol::{Envelope, Event, PackageLockState, Request, Response};

/// Shared state handed to every connection.
pub struct IpcState {
    /// Configuration with loaded caller tokens.
    pub config: Arc<GlobalConfig>,
    /// The policy engine façade.
    pub service: Arc<PolicyService>,
    /// Credential surface that subscribers drain.
    pub surface: BroadcastSurface,
}

/// What a command asks the connection to do next.
enum Reply {
    /// Write one response and keep reading requests.
    Once(Response),
    /// Acknowledge, then stream events until hang-up.
    Stream(EventSource),
}

/// Event feed of a subscribed connection, scoped to one user.
enum EventSource {
    /// The surface already keeps one channel per user.
    UnlockRequests(broadcast::Receiver<UnlockRequest>),
    LockEvents(UserId, broadcast::Receiver<LockEvent>),
}

impl EventSource {
    /// Next event for the subscribed user; `None` once the channel closes.
    async fn next(&mut self) -> Option<Event> {
        loop {
            let received = match self {
                Self::UnlockRequests(rx) => rx
                    .recv()
                    .await
                    .map(|request| Some(Event::UnlockRequest(request))),
                Self::LockEvents(user, rx) => match rx.recv().await {
                    Ok(event) if event.user == *user => Ok(Some(Event::LockChanged(event))),
                    Ok(_) => Ok(None),
                    Err(err) => Err(err),
                },
            };

            match received {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ipc subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<IpcState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state, ct.child_token()));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
///
/// An overlong line is answered with `InvalidArgument` and ends the
/// connection, since the rest of that line cannot be trusted as framing.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<IpcState>,
    ct: CancellationToken,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut lines = FramedRead::new(reader, LineCodec::new());

        loop {
            let item = tokio::select! {
                () = ct.cancelled() => break,
                item = lines.next() => item,
            };
            let line = match item {
                None => break, // EOF
                Some(Ok(line)) => line,
                Some(Err(err @ AppError::InvalidArgument(_))) => {
                    warn!(%err, "ipc request rejected");
                    let _ = write_line(&mut writer, &Response::failure(&err)).await;
                    break;
                }
                Some(Err(err)) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let reply = match serde_json::from_str::<Envelope>(trimmed) {
                Ok(envelope) => dispatch(envelope, &state).await,
                Err(err) => Reply::Once(Response::failure(&AppError::from(err))),
            };

            match reply {
                Reply::Once(response) => {
                    if write_line(&mut writer, &response).await.is_err() {
                        break;
                    }
                }
                Reply::Stream(mut source) => {
                    let ack = Response::success(serde_json::json!({ "subscribed": true }));
                    if write_line(&mut writer, &ack).await.is_err() {
                        break;
                    }
                    info!("ipc connection streaming events");
                    loop {
                        let event = tokio::select! {
                            () = ct.cancelled() => break,
                            item = lines.next() => match item {
                                // Subscribed connections send nothing further.
                                Some(Ok(_)) => continue,
                                None | Some(Err(_)) => break,
                            },
                            event = source.next() => event,
                        };
                        let Some(event) = event else { break };
                        if write_line(&mut writer, &event).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut response_line = serde_json::to_string(value).unwrap_or_else(|_| {
        r#"{"ok":false,"error":{"kind":"ipc","message":"serialization failed"}}"#.to_owned()
    });
    response_line.push('\n');

    let written = writer.write_all(response_line.as_bytes()).await;
    if let Err(ref err) = written {
        warn!(%err, "failed to write ipc response");
    }
    written
}

/// Authenticate the envelope and route its command.
async fn dispatch(envelope: Envelope, state: &IpcState) -> Reply {
    let command = envelope.request.command();
    let span = info_span!("ipc_command", command);

    async move {
        let Some(caller) = state.config.caller_for_token(&envelope.auth_token) else {
            warn!(command, "IPC request rejected: invalid auth token");
            return Reply::Once(Response::failure(&AppError::PermissionDenied(
                "unknown caller token".into(),
            )));
        };
        debug!(caller = %caller.name, user = %caller.user, "ipc command received");

        match envelope.request {
            Request::SubscribeUnlockRequests => {
                match state.service.authorize(&caller, Operation::SubscribeUnlockRequests) {
                    Ok(()) => {
                        Reply::Stream(EventSource::UnlockRequests(state.surface.subscribe(caller.user)))
                    }
                    Err(err) => Reply::Once(Response::failure(&err)),
                }
            }
            Request::SubscribeLockEvents => match state.service.subscribe_lock_events(&caller) {
                Ok(rx) => Reply::Stream(EventSource::LockEvents(caller.user, rx)),
                Err(err) => Reply::Once(Response::failure(&err)),
            },
            request => Reply::Once(handle_request(request, &caller, &state.service).await),
        }
    }
    .instrument(span)
    .await
}

fn reply<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(value) => Response::from_serialize(&value),
        Err(err) => {
            debug!(%err, "ipc command failed");
            Response::failure(&err)
        }
    }
}

/// Run a request/response command for `caller`.
async fn handle_request(request: Request, caller: &Caller, service: &PolicyService) -> Response {
    match request {
        Request::AddPackage { package_name } => {
            reply(service.add_package(caller, &package_name).await)
        }
        Request::RemovePackage { package_name } => {
            reply(service.remove_package(caller, &package_name).await)
        }
        Request::GetTimeout => reply(service.get_timeout(caller).await),
        Request::SetTimeout { timeout_millis } => {
            reply(service.set_timeout(caller, timeout_millis).await)
        }
        Request::GetPackageData => reply(service.get_package_data(caller).await),
        Request::SetShouldRedactNotification {
            package_name,
            redact,
        } => reply(
            service
                .set_should_redact_notification(caller, &package_name, redact)
                .await,
        ),
        Request::SetBiometricsAllowed { allowed } => {
            reply(service.set_biometrics_allowed(caller, allowed).await)
        }
        Request::IsBiometricsAllowed => reply(service.is_biometrics_allowed(caller).await),
        Request::UnlockPackage { package_name } => {
            reply(service.unlock_package(caller, &package_name).await)
        }
        Request::SetPackageHidden {
            package_name,
            hidden,
        } => reply(
            service
                .set_package_hidden(caller, &package_name, hidden)
                .await,
        ),
        Request::GetHiddenPackages => reply(service.get_hidden_packages(caller).await),
        Request::CheckLocked { package_name } => {
            reply(service.check_locked(caller, &package_name).await)
        }
        Request::LockStates => reply(service.lock_states(caller).await.map(|states| {
            states
                .into_iter()
                .map(|(package_name, state)| PackageLockState {
                    package_name,
                    state,
                })
                .collect::<Vec<_>>()
        })),
        Request::RequestUnlock {
            package_name,
            allow_biometrics,
        } => reply(
            service
                .request_unlock(caller, &package_name, allow_biometrics)
                .await,
        ),
        Request::AuthenticationResult {
            package_name,
            request_id,
            success,
        } => reply(
            service
                .report_authentication_result(caller, &package_name, request_id, success)
                .await,
        ),
        Request::RelockPackage { package_name } => {
            reply(service.relock_package(caller, &package_name).await)
        }
        Request::DeviceLocked => reply(service.device_locked(caller).await),
        Request::PackageInstalled {
            package_name,
            label,
            system,
        } => {
            let info = PackageInfo {
                label: label.unwrap_or_else(|| package_name.clone()),
                package_name,
                system,
            };
            reply(service.package_installed(caller, info))
        }
        Request::PackageRemoved { package_name } => {
            reply(service.package_removed(caller, &package_name).await)
        }
        Request::UserRemoved => reply(service.user_removed(caller).await),
        Request::ShouldRedactNotification { package_name } => {
            reply(service.should_redact_notification(caller, &package_name).await)
        }
        Request::SubscribeUnlockRequests | Request::SubscribeLockEvents => Response::failure(
            &AppError::InvalidArgument("subscriptions are handled per connection".into()),
        ),
    }
}
