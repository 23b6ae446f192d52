use app_lock::config::{CatalogMode, GlobalConfig};
use app_lock::models::caller::Permission;
use app_lock::models::user_policy::TimeoutFallback;
use app_lock::models::UserId;
use app_lock::AppError;

fn sample_toml() -> &'static str {
    r#"
db_path = "/var/lib/app-lock/policy.db"
ipc_name = "app-lock-test"
catalog_mode = "strict"

[policy]
min_timeout_millis = 2000
default_timeout_millis = 15000
auth_flow_timeout_seconds = 30
timeout_fallback = "default"
allowed_system_apps = ["com.android.settings"]

[[callers]]
name = "settings"
user_id = 0
permissions = ["manage_app_lock"]

[[callers]]
name = "launcher-10"
user_id = 10
"#
}

#[test]
fn parses_valid_config() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.ipc_name, "app-lock-test");
    assert_eq!(config.catalog_mode, CatalogMode::Strict);
    assert_eq!(config.policy.min_timeout_millis, 2000);
    assert_eq!(config.policy.default_timeout_millis, 15000);
    assert_eq!(config.policy.timeout_fallback, TimeoutFallback::Default);
    assert_eq!(config.policy.allowed_system_apps, vec!["com.android.settings"]);
    assert_eq!(config.auth_flow_timeout().as_secs(), 30);
    assert_eq!(config.callers.len(), 2);
    assert!(
        config.callers.iter().all(|caller| caller.auth_token.is_empty()),
        "tokens are never read from TOML"
    );
}

#[test]
fn defaults_apply_to_minimal_config() {
    let config = GlobalConfig::from_toml_str(r#"db_path = "policy.db""#).expect("config parses");

    assert_eq!(config.ipc_name, "app-lock");
    assert_eq!(config.catalog_mode, CatalogMode::Open);
    assert_eq!(config.policy.min_timeout_millis, 5000);
    assert_eq!(config.policy.default_timeout_millis, 10000);
    assert_eq!(config.policy.auth_flow_timeout_seconds, 60);
    assert_eq!(config.policy.timeout_fallback, TimeoutFallback::Sentinel);
    assert!(config.callers.is_empty());
}

#[test]
fn rejects_default_below_minimum() {
    let toml = r#"
db_path = "policy.db"

[policy]
min_timeout_millis = 5000
default_timeout_millis = 1000
"#;
    let err = GlobalConfig::from_toml_str(toml).expect_err("default below minimum");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_zero_minimum_and_zero_flow_timeout() {
    let zero_min = r#"
db_path = "policy.db"
[policy]
min_timeout_millis = 0
"#;
    assert!(GlobalConfig::from_toml_str(zero_min).is_err());

    let zero_flow = r#"
db_path = "policy.db"
[policy]
auth_flow_timeout_seconds = 0
"#;
    assert!(GlobalConfig::from_toml_str(zero_flow).is_err());
}

#[test]
fn rejects_duplicate_caller_names() {
    let toml = r#"
db_path = "policy.db"

[[callers]]
name = "settings"
user_id = 0

[[callers]]
name = "settings"
user_id = 10
"#;
    let err = GlobalConfig::from_toml_str(toml).expect_err("duplicate caller");
    assert!(err.to_string().contains("duplicate caller name"));
}

#[test]
fn rejects_unknown_permission() {
    let toml = r#"
db_path = "policy.db"

[[callers]]
name = "settings"
user_id = 0
permissions = ["root"]
"#;
    assert!(matches!(
        GlobalConfig::from_toml_str(toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.ipc_name, "app-lock-test");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let err = GlobalConfig::load_from_path("/nonexistent/app-lock.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn token_env_var_is_derived_from_name() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");
    assert_eq!(config.callers[0].token_env_var(), "APP_LOCK_TOKEN_SETTINGS");
    assert_eq!(
        config.callers[1].token_env_var(),
        "APP_LOCK_TOKEN_LAUNCHER_10"
    );
}

#[test]
fn caller_for_token_resolves_identity() {
    let mut config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");
    config.callers[0].auth_token = "tok-settings".into();
    config.callers[1].auth_token = "tok-launcher".into();

    let settings = config.caller_for_token("tok-settings").expect("known token");
    assert_eq!(settings.name, "settings");
    assert_eq!(settings.user, UserId(0));
    assert!(settings.holds(Permission::ManageAppLock));

    let launcher = config.caller_for_token("tok-launcher").expect("known token");
    assert_eq!(launcher.user, UserId(10));
    assert!(!launcher.holds(Permission::ManageAppLock));

    assert!(config.caller_for_token("bogus").is_none());
    assert!(config.caller_for_token("").is_none());
}
