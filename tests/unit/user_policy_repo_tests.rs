use std::sync::Arc;

use app_lock::models::package::ProtectedPackage;
use app_lock::models::user_policy::UserPolicy;
use app_lock::models::UserId;
use app_lock::persistence::db;
use app_lock::persistence::package_repo::PackageRepo;
use app_lock::persistence::user_policy_repo::UserPolicyRepo;

async fn repos() -> (PackageRepo, UserPolicyRepo) {
    let db = Arc::new(db::connect_memory().await.expect("db connect"));
    (PackageRepo::new(Arc::clone(&db)), UserPolicyRepo::new(db))
}

#[tokio::test]
async fn unconfigured_user_has_no_policy() {
    let (_, policies) = repos().await;

    assert!(policies.get(UserId(0)).await.expect("get").is_none());
    assert!(!policies.set_timeout(UserId(0), 30_000).await.expect("set"));
    assert!(!policies
        .set_biometrics_allowed(UserId(0), false)
        .await
        .expect("set"));
}

#[tokio::test]
async fn updates_apply_to_configured_user() {
    let (packages, policies) = repos().await;
    let user = UserId(0);
    packages
        .insert(
            &ProtectedPackage::new(user, "com.example.app".into()),
            &UserPolicy::new(user),
        )
        .await
        .expect("insert");

    assert!(policies.set_timeout(user, 30_000).await.expect("set"));
    assert!(policies.set_biometrics_allowed(user, false).await.expect("set"));

    let policy = policies.get(user).await.expect("get").expect("row");
    assert_eq!(policy.timeout_millis, 30_000);
    assert!(!policy.biometrics_allowed);
}

#[tokio::test]
async fn purge_removes_only_that_user() {
    let (packages, policies) = repos().await;
    for (user, name) in [
        (UserId(0), "com.example.a"),
        (UserId(0), "com.example.b"),
        (UserId(10), "com.example.a"),
    ] {
        packages
            .insert(&ProtectedPackage::new(user, name.into()), &UserPolicy::new(user))
            .await
            .expect("insert");
    }

    assert_eq!(policies.purge_user(UserId(0)).await.expect("purge"), 2);

    assert!(policies.get(UserId(0)).await.expect("get").is_none());
    assert!(packages.list_for_user(UserId(0)).await.expect("list").is_empty());
    assert!(policies.get(UserId(10)).await.expect("get").is_some());
    assert_eq!(packages.list_for_user(UserId(10)).await.expect("list").len(), 1);
}
