//! End-to-end lock lifecycle through the `PolicyService` façade.

use std::time::Duration;

use app_lock::engine::broker::UnlockOutcome;
use app_lock::models::lock::{LockKey, LockState};
use app_lock::models::UserId;
use app_lock::AppError;

use super::test_helpers::{harness, manager, DEFAULT_TIMEOUT_MILLIS, MIN_TIMEOUT_MILLIS};

const APP: &str = "com.example.app";

/// Comfortably longer than the default re-lock timeout.
const PAST_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MILLIS as u64 * 3);

fn started(outcome: UnlockOutcome) -> uuid::Uuid {
    match outcome {
        UnlockOutcome::Started { request_id } => request_id,
        UnlockOutcome::AlreadyUnlocked => panic!("expected a started flow"),
    }
}

#[tokio::test]
async fn add_unlock_then_timeout_relocks() {
    let h = harness().await;
    let caller = manager(0);

    h.service.add_package(&caller, APP).await.expect("add");
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Locked
    );

    h.service.unlock_package(&caller, APP).await.expect("unlock");
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Unlocked
    );

    tokio::time::sleep(PAST_TIMEOUT).await;
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Locked
    );

    // Further timer fires while locked have no effect.
    tokio::time::sleep(PAST_TIMEOUT).await;
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Locked
    );
}

#[tokio::test]
async fn credential_flow_unlocks_on_success() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");

    let id = started(
        h.service
            .request_unlock(&caller, APP, true)
            .await
            .expect("request"),
    );
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::PendingAuthentication
    );

    let sent = h.surface.last();
    assert_eq!(sent.request_id, id);
    assert_eq!(sent.user, UserId(0));
    assert_eq!(sent.package_label, APP, "open catalog labels by package name");

    assert!(h
        .service
        .report_authentication_result(&caller, APP, Some(id), true)
        .await
        .expect("report"));
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Unlocked
    );

    tokio::time::sleep(PAST_TIMEOUT).await;
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Locked
    );
}

#[tokio::test]
async fn credential_flow_failure_stays_locked() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");

    let id = started(h.service.request_unlock(&caller, APP, true).await.expect("request"));
    assert!(h
        .service
        .report_authentication_result(&caller, APP, Some(id), false)
        .await
        .expect("report"));
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Locked
    );
}

#[tokio::test]
async fn biometrics_flag_gates_request() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");

    h.service.request_unlock(&caller, APP, true).await.expect("request");
    assert!(h.surface.last().allow_biometrics);
    h.service
        .report_authentication_result(&caller, APP, None, false)
        .await
        .expect("report");

    h.service.request_unlock(&caller, APP, false).await.expect("request");
    assert!(!h.surface.last().allow_biometrics, "per-request opt-out");
    h.service
        .report_authentication_result(&caller, APP, None, false)
        .await
        .expect("report");

    h.service
        .set_biometrics_allowed(&caller, false)
        .await
        .expect("disable");
    h.service.request_unlock(&caller, APP, true).await.expect("request");
    assert!(!h.surface.last().allow_biometrics, "user policy wins");
}

#[tokio::test]
async fn concurrent_requests_for_same_key_allow_one_flow() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");

    let (a, b) = tokio::join!(
        h.service.request_unlock(&caller, APP, true),
        h.service.request_unlock(&caller, APP, true),
    );

    let results = [a, b];
    let started = results.iter().filter(|r| r.is_ok()).count();
    let pending = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::AlreadyPending(_))))
        .count();
    assert_eq!((started, pending), (1, 1));
    assert_eq!(h.surface.requests().len(), 1);
}

#[tokio::test]
async fn request_unlock_when_already_unlocked_reports_it() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");
    h.service.unlock_package(&caller, APP).await.expect("unlock");

    let outcome = h
        .service
        .request_unlock(&caller, APP, true)
        .await
        .expect("request");
    assert_eq!(outcome, UnlockOutcome::AlreadyUnlocked);
    assert!(h.surface.requests().is_empty());
}

#[tokio::test]
async fn unlock_package_supersedes_pending_flow() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");
    let id = started(h.service.request_unlock(&caller, APP, true).await.expect("request"));

    h.service.unlock_package(&caller, APP).await.expect("unlock");

    assert!(!h
        .service
        .report_authentication_result(&caller, APP, Some(id), false)
        .await
        .expect("report"));
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Unlocked
    );
}

#[tokio::test]
async fn remove_while_pending_cancels_flow() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");
    let id = started(h.service.request_unlock(&caller, APP, true).await.expect("request"));

    h.service.remove_package(&caller, APP).await.expect("remove");

    assert!(!h
        .service
        .report_authentication_result(&caller, APP, Some(id), true)
        .await
        .expect("report"));
    assert!(matches!(
        h.service.check_locked(&caller, APP).await,
        Err(AppError::NotProtected(_))
    ));
    assert!(h.service.tracker().keys_for_user(UserId(0)).is_empty());

    // Protecting again starts clean.
    h.service.add_package(&caller, APP).await.expect("re-add");
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Locked
    );
}

#[tokio::test]
async fn state_exists_iff_entry_exists() {
    let h = harness().await;
    let caller = manager(0);
    let names = ["com.example.a", "com.example.b", "com.example.c"];
    for name in names {
        h.service.add_package(&caller, name).await.expect("add");
    }
    h.service.remove_package(&caller, "com.example.b").await.expect("remove");
    assert!(matches!(
        h.service.add_package(&caller, "com.example.a").await,
        Err(AppError::AlreadyProtected(_))
    ));

    let persisted: Vec<String> = h
        .service
        .get_package_data(&caller)
        .await
        .expect("list")
        .into_iter()
        .map(|entry| entry.package_name)
        .collect();
    assert_eq!(persisted, vec!["com.example.a", "com.example.c"]);

    let mut tracked: Vec<String> = h
        .service
        .tracker()
        .keys_for_user(UserId(0))
        .into_iter()
        .map(|key: LockKey| key.package)
        .collect();
    tracked.sort();
    assert_eq!(tracked, persisted);
}

#[tokio::test]
async fn set_timeout_below_minimum_is_rejected() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");

    let err = h
        .service
        .set_timeout(&caller, MIN_TIMEOUT_MILLIS - 1)
        .await
        .expect_err("below minimum");
    assert!(matches!(err, AppError::InvalidArgument(_)));
    assert_eq!(
        h.service.get_timeout(&caller).await.expect("timeout"),
        DEFAULT_TIMEOUT_MILLIS
    );
}

#[tokio::test]
async fn new_timeout_applies_to_next_unlock() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");
    h.service.set_timeout(&caller, 10_000).await.expect("set");

    h.service.unlock_package(&caller, APP).await.expect("unlock");
    tokio::time::sleep(PAST_TIMEOUT).await;
    assert_eq!(
        h.service.check_locked(&caller, APP).await.expect("state"),
        LockState::Unlocked
    );
}

#[tokio::test]
async fn relock_and_device_lock() {
    let h = harness().await;
    let caller = manager(0);
    h.service.add_package(&caller, APP).await.expect("add");
    h.service
        .add_package(&caller, "com.example.other")
        .await
        .expect("add");
    h.service.set_timeout(&caller, 10_000).await.expect("set");

    h.service.unlock_package(&caller, APP).await.expect("unlock");
    assert!(h.service.relock_package(&caller, APP).await.expect("relock"));
    assert!(!h.service.relock_package(&caller, APP).await.expect("relock"));

    h.service.unlock_package(&caller, APP).await.expect("unlock");
    h.service
        .unlock_package(&caller, "com.example.other")
        .await
        .expect("unlock");
    assert_eq!(h.service.device_locked(&caller).await.expect("lock"), 2);

    let states = h.service.lock_states(&caller).await.expect("states");
    assert!(states.iter().all(|(_, state)| *state == LockState::Locked));
}

#[tokio::test]
async fn lock_events_reach_subscribers() {
    let h = harness().await;
    let caller = manager(0);
    let mut events = h.service.subscribe_lock_events(&caller).expect("subscribe");

    h.service.add_package(&caller, APP).await.expect("add");
    h.service.unlock_package(&caller, APP).await.expect("unlock");

    let first = events.recv().await.expect("event");
    assert_eq!(first.state, Some(LockState::Locked));
    let second = events.recv().await.expect("event");
    assert_eq!(second.state, Some(LockState::Unlocked));
}
