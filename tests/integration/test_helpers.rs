//! Shared test helpers for service-level integration tests.
//!
//! Builds a `PolicyService` over an in-memory database with short timers
//! and a recording credential surface, so individual test modules can
//! focus on behaviour rather than boilerplate.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use app_lock::config::GlobalConfig;
use app_lock::engine;
use app_lock::engine::service::PolicyService;
use app_lock::engine::surface::{CredentialSurface, UnlockRequest};
use app_lock::models::caller::{Caller, Permission};
use app_lock::models::UserId;
use app_lock::persistence::db;
use app_lock::Result;

/// Re-lock timeout every test user starts with.
pub const DEFAULT_TIMEOUT_MILLIS: i64 = 60;

/// Smallest timeout tests may set.
pub const MIN_TIMEOUT_MILLIS: i64 = 20;

/// Config with millisecond-scale timeouts.
pub fn test_config(extra_policy: &str) -> GlobalConfig {
    let toml = format!(
        r#"
db_path = "unused.db"
ipc_name = "app-lock-test"

[policy]
min_timeout_millis = {MIN_TIMEOUT_MILLIS}
default_timeout_millis = {DEFAULT_TIMEOUT_MILLIS}
auth_flow_timeout_seconds = 5
{extra_policy}
"#
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Surface that records unlock requests instead of showing UI.
#[derive(Default)]
pub struct RecordingSurface {
    requests: Mutex<Vec<UnlockRequest>>,
}

impl RecordingSurface {
    pub fn requests(&self) -> Vec<UnlockRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> UnlockRequest {
        self.requests().pop().expect("an unlock request was sent")
    }
}

impl CredentialSurface for RecordingSurface {
    fn launch(
        &self,
        request: UnlockRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            Ok(())
        })
    }
}

/// A service and its surface double.
pub struct Harness {
    pub service: PolicyService,
    pub surface: Arc<RecordingSurface>,
}

pub async fn harness() -> Harness {
    harness_with(&test_config("")).await
}

pub async fn harness_with(config: &GlobalConfig) -> Harness {
    let db = Arc::new(db::connect_memory().await.expect("db connect"));
    let surface = Arc::new(RecordingSurface::default());
    let service = engine::build(
        config,
        db,
        Arc::clone(&surface) as Arc<dyn CredentialSurface>,
    )
    .expect("service builds");
    Harness { service, surface }
}

/// Privileged caller acting for `user`.
pub fn manager(user: u32) -> Caller {
    Caller::new("settings", UserId(user), vec![Permission::ManageAppLock])
}

/// Caller without any grant.
pub fn unprivileged(user: u32) -> Caller {
    Caller::new("untrusted", UserId(user), Vec::new())
}
