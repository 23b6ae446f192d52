//! Unit tests for caller token loading.
//!
//! The test environment has no keychain entries under the `app-lock`
//! service, so tokens come from `APP_LOCK_TOKEN_<NAME>`. Every test uses
//! caller names of its own so the process-global env vars never collide.

use app_lock::config::GlobalConfig;
use app_lock::AppError;

fn config_with_callers(names: &[&str]) -> GlobalConfig {
    let mut toml = String::from("db_path = \"policy.db\"\n");
    for (user, name) in names.iter().enumerate() {
        toml.push_str(&format!(
            "\n[[callers]]\nname = \"{name}\"\nuser_id = {user}\npermissions = [\"manage_app_lock\"]\n"
        ));
    }
    GlobalConfig::from_toml_str(&toml).expect("config parses")
}

#[tokio::test]
async fn env_var_tokens_are_loaded() {
    let mut config = config_with_callers(&["cred-alpha", "cred-beta"]);
    std::env::set_var("APP_LOCK_TOKEN_CRED_ALPHA", "alpha-secret");
    std::env::set_var("APP_LOCK_TOKEN_CRED_BETA", "beta-secret");

    config.load_credentials().await.expect("tokens load");

    assert_eq!(config.callers[0].auth_token, "alpha-secret");
    assert_eq!(config.callers[1].auth_token, "beta-secret");
    let caller = config.caller_for_token("beta-secret").expect("resolves");
    assert_eq!(caller.name, "cred-beta");
}

#[tokio::test]
async fn missing_token_is_config_error() {
    let mut config = config_with_callers(&["cred-missing"]);
    std::env::remove_var("APP_LOCK_TOKEN_CRED_MISSING");

    let err = config.load_credentials().await.expect_err("no token");
    assert!(matches!(err, AppError::Config(_)));
    assert!(err.to_string().contains("APP_LOCK_TOKEN_CRED_MISSING"));
}

#[tokio::test]
async fn empty_token_is_treated_as_missing() {
    let mut config = config_with_callers(&["cred-empty"]);
    std::env::set_var("APP_LOCK_TOKEN_CRED_EMPTY", "");

    assert!(config.load_credentials().await.is_err());
}

#[tokio::test]
async fn shared_token_is_rejected() {
    let mut config = config_with_callers(&["cred-one", "cred-two"]);
    std::env::set_var("APP_LOCK_TOKEN_CRED_ONE", "same-secret");
    std::env::set_var("APP_LOCK_TOKEN_CRED_TWO", "same-secret");

    let err = config.load_credentials().await.expect_err("shared token");
    assert!(err.to_string().contains("reuses another caller's token"));
}
