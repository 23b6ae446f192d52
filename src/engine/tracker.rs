//! Per-user, per-package runtime lock state machine.
//!
//! Every protected package owns a slot holding its [`LockState`]. Slots
//! are individually locked: callers take a [`KeyGuard`] through
//! [`LockStateTracker::lock_key`] and every transition for that key is
//! serialized behind it, while other keys proceed independently. The
//! shared slot map is only touched for lookups and never held across an
//! `.await`.
//!
//! Re-lock timers are tokio tasks guarded by a [`CancellationToken`] and a
//! slot generation counter; a timer whose generation no longer matches
//! (because the slot moved on) fires as a no-op. An outstanding credential
//! flow lives in its package's slot too, so resolving it only ever takes
//! that key's lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::models::lock::{LockEvent, LockKey, LockState};
use crate::models::UserId;
use crate::{AppError, Result};

/// Capacity of the lock event channel before slow subscribers lag.
const EVENT_CAPACITY: usize = 256;

/// Credential flow outstanding while a slot is `PendingAuthentication`.
struct Flow {
    id: Uuid,
    /// Re-lock delay armed if the flow succeeds.
    relock_after: Duration,
    /// Cancelled as soon as the slot leaves this flow.
    watchdog: CancellationToken,
}

#[derive(Default)]
struct Slot {
    state: Option<LockState>,
    /// Bumped on every transition; re-lock timers capture it.
    generation: u64,
    relock: Option<CancellationToken>,
    flow: Option<Flow>,
    /// Set once the slot has been dropped from the map.
    retired: bool,
}

struct TrackerInner {
    slots: StdMutex<HashMap<LockKey, Arc<Mutex<Slot>>>>,
    events: broadcast::Sender<LockEvent>,
}

/// In-memory lock state for every protected package.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LockStateTracker {
    inner: Arc<TrackerInner>,
}

impl Default for LockStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStateTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(TrackerInner {
                slots: StdMutex::new(HashMap::new()),
                events,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<LockKey, Arc<Mutex<Slot>>>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to state change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.inner.events.subscribe()
    }

    /// Take exclusive access to `key`'s slot, creating an empty one if needed.
    ///
    /// An empty slot (no state) is discarded when the guard drops.
    pub async fn lock_key(&self, key: &LockKey) -> KeyGuard {
        loop {
            let cell = {
                let mut slots = self.slots();
                Arc::clone(slots.entry(key.clone()).or_default())
            };
            let slot = Arc::clone(&cell).lock_owned().await;
            if slot.retired {
                // Lost a race with the previous owner dropping the slot.
                continue;
            }
            return KeyGuard {
                key: key.clone(),
                slot,
                cell,
                tracker: self.clone(),
            };
        }
    }

    /// Current state of `key`, or `None` if it is not protected.
    pub async fn state(&self, key: &LockKey) -> Option<LockState> {
        let cell = self.slots().get(key).cloned()?;
        let slot = cell.lock().await;
        if slot.retired {
            None
        } else {
            slot.state
        }
    }

    /// Keys currently tracked for `user`.
    #[must_use]
    pub fn keys_for_user(&self, user: UserId) -> Vec<LockKey> {
        self.slots()
            .keys()
            .filter(|key| key.user == user)
            .cloned()
            .collect()
    }

    /// Snapshot of every protected package of `user` and its state, sorted by name.
    pub async fn snapshot(&self, user: UserId) -> Vec<(String, LockState)> {
        let mut states = Vec::new();
        for key in self.keys_for_user(user) {
            if let Some(state) = self.state(&key).await {
                states.push((key.package, state));
            }
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Move `key` from `Unlocked` back to `Locked`.
    ///
    /// Returns `false` when the package was not unlocked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not protected.
    pub async fn relock(&self, key: &LockKey) -> Result<bool> {
        let mut guard = self.lock_key(key).await;
        if guard.state().is_none() {
            return Err(AppError::NotProtected(format!("{key} is not protected")));
        }
        Ok(guard.relock())
    }

    /// Re-lock every unlocked package of `user` (device lock, screen off).
    ///
    /// Pending credential flows are left to resolve on their own.
    /// Returns how many packages were re-locked.
    pub async fn lock_user(&self, user: UserId) -> usize {
        let mut relocked = 0;
        for key in self.keys_for_user(user) {
            let mut guard = self.lock_key(&key).await;
            if guard.relock() {
                relocked += 1;
            }
        }
        info!(%user, relocked, "user packages re-locked");
        relocked
    }

    /// Timer callback: re-lock `key` if it is still in the unlock that armed the timer.
    async fn expire(&self, key: &LockKey, generation: u64) {
        let Some(cell) = self.slots().get(key).cloned() else {
            debug!(%key, "re-lock timer fired for untracked package");
            return;
        };
        let mut guard = {
            let slot = Arc::clone(&cell).lock_owned().await;
            if slot.retired {
                return;
            }
            KeyGuard {
                key: key.clone(),
                slot,
                cell,
                tracker: self.clone(),
            }
        };

        if guard.slot.generation != generation || guard.state() != Some(LockState::Unlocked) {
            debug!(%key, "stale re-lock timer ignored");
            return;
        }
        guard.transition(Some(LockState::Locked));
        info!(%key, "re-lock timeout elapsed");
    }

    fn publish(&self, key: &LockKey, state: Option<LockState>) {
        // No subscribers is fine.
        let _ = self.inner.events.send(LockEvent {
            user: key.user,
            package: key.package.clone(),
            state,
        });
    }
}

/// Exclusive access to one package's lock slot.
///
/// All transitions for a key go through a guard, so they are serialized.
pub struct KeyGuard {
    key: LockKey,
    slot: OwnedMutexGuard<Slot>,
    cell: Arc<Mutex<Slot>>,
    tracker: LockStateTracker,
}

impl KeyGuard {
    /// Key this guard holds.
    #[must_use]
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Current state; `None` means the package is not protected.
    #[must_use]
    pub fn state(&self) -> Option<LockState> {
        self.slot.state
    }

    /// Start tracking the package as `Locked`. Returns `false` if already tracked.
    pub fn protect(&mut self) -> bool {
        if self.slot.state.is_some() {
            return false;
        }
        self.transition(Some(LockState::Locked));
        true
    }

    /// Stop tracking the package, discarding any timer or pending flow.
    ///
    /// Returns the identifier of the credential flow that was outstanding.
    pub fn unprotect(&mut self) -> Option<Uuid> {
        if self.slot.state.is_none() {
            return None;
        }
        let flow = self.pending_flow();
        self.transition(None);
        flow
    }

    /// Identifier of the outstanding credential flow, if any.
    #[must_use]
    pub fn pending_flow(&self) -> Option<Uuid> {
        self.slot.flow.as_ref().map(|flow| flow.id)
    }

    /// Token cancelled once the outstanding flow resolves or is superseded.
    #[must_use]
    pub fn flow_watchdog(&self) -> Option<CancellationToken> {
        self.slot.flow.as_ref().map(|flow| flow.watchdog.clone())
    }

    /// `Locked → PendingAuthentication`, returning the new flow identifier.
    ///
    /// `relock_after` is the re-lock delay armed if the flow succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not tracked,
    /// `AppError::AlreadyPending` if a flow is outstanding, and
    /// `AppError::InvalidArgument` if the package is already unlocked.
    pub fn begin_authentication(&mut self, relock_after: Duration) -> Result<Uuid> {
        match self.slot.state {
            None => Err(AppError::NotProtected(format!(
                "{} is not protected",
                self.key
            ))),
            Some(LockState::PendingAuthentication) => Err(AppError::AlreadyPending(format!(
                "authentication already pending for {}",
                self.key
            ))),
            Some(LockState::Unlocked) => Err(AppError::InvalidArgument(format!(
                "{} is already unlocked",
                self.key
            ))),
            Some(LockState::Locked) => {
                let id = Uuid::new_v4();
                self.transition(Some(LockState::PendingAuthentication));
                self.slot.flow = Some(Flow {
                    id,
                    relock_after,
                    watchdog: CancellationToken::new(),
                });
                Ok(id)
            }
        }
    }

    /// Resolve the pending flow `flow`.
    ///
    /// Success unlocks and arms the re-lock timer given when the flow
    /// began; failure returns to `Locked`. Returns `false` (no change) when
    /// `flow` is not the flow currently pending.
    pub fn finish_authentication(&mut self, flow: Uuid, success: bool) -> bool {
        let relock_after = match &self.slot.flow {
            Some(pending)
                if pending.id == flow
                    && self.slot.state == Some(LockState::PendingAuthentication) =>
            {
                pending.relock_after
            }
            _ => return false,
        };
        if success {
            self.transition(Some(LockState::Unlocked));
            self.arm_relock(relock_after);
        } else {
            self.transition(Some(LockState::Locked));
        }
        true
    }

    /// Unlock directly after out-of-band authentication.
    ///
    /// Works from any tracked state; an unlocked package gets a fresh
    /// timer. Returns the flow that was superseded, if one was pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotProtected` if the package is not tracked.
    pub fn unlock(&mut self, relock_after: Duration) -> Result<Option<Uuid>> {
        if self.slot.state.is_none() {
            return Err(AppError::NotProtected(format!(
                "{} is not protected",
                self.key
            )));
        }
        let superseded = self.pending_flow();
        self.transition(Some(LockState::Unlocked));
        self.arm_relock(relock_after);
        Ok(superseded)
    }

    /// `Unlocked → Locked`. Returns `false` if the package was not unlocked.
    pub fn relock(&mut self) -> bool {
        if self.slot.state != Some(LockState::Unlocked) {
            return false;
        }
        self.transition(Some(LockState::Locked));
        true
    }

    fn transition(&mut self, next: Option<LockState>) {
        if let Some(timer) = self.slot.relock.take() {
            timer.cancel();
        }
        if let Some(flow) = self.slot.flow.take() {
            flow.watchdog.cancel();
        }
        self.slot.generation = self.slot.generation.wrapping_add(1);
        let previous = self.slot.state;
        self.slot.state = next;
        debug!(key = %self.key, ?previous, ?next, "lock state transition");
        self.tracker.publish(&self.key, next);
    }

    fn arm_relock(&mut self, delay: Duration) {
        let token = CancellationToken::new();
        self.slot.relock = Some(token.clone());

        let tracker = self.tracker.clone();
        let key = self.key.clone();
        let generation = self.slot.generation;
        let span = info_span!("relock_timer", key = %key, delay_ms = delay.as_millis());

        tokio::spawn(
            async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(delay) => tracker.expire(&key, generation).await,
                }
            }
            .instrument(span),
        );
    }
}

impl Drop for KeyGuard {
    /// Drop the slot from the map once it no longer tracks a package.
    fn drop(&mut self) {
        if self.slot.state.is_some() {
            return;
        }
        self.slot.retired = true;
        let mut slots = self.tracker.slots();
        if slots
            .get(&self.key)
            .is_some_and(|cell| Arc::ptr_eq(cell, &self.cell))
        {
            slots.remove(&self.key);
        }
    }
}
