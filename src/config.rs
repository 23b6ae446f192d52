//! Global configuration parsing, validation, and credential loading.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::caller::{Caller, Permission};
use crate::models::user_policy::{TimeoutFallback, DEFAULT_TIMEOUT_MILLIS};
use crate::models::UserId;
use crate::{AppError, Result};

/// Keychain service under which caller tokens are stored.
const KEYRING_SERVICE: &str = "app-lock";

/// Lock policy tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Smallest re-lock timeout a caller may set.
    #[serde(default = "default_min_timeout_millis")]
    pub min_timeout_millis: i64,
    /// Re-lock timeout for users that never set one.
    #[serde(default = "default_timeout_millis")]
    pub default_timeout_millis: i64,
    /// Upper bound on how long a credential flow may stay pending.
    #[serde(default = "default_auth_flow_timeout_seconds")]
    pub auth_flow_timeout_seconds: u64,
    /// What `get_timeout` reports for unconfigured users.
    #[serde(default)]
    pub timeout_fallback: TimeoutFallback,
    /// System packages that may be protected.
    #[serde(default)]
    pub allowed_system_apps: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_timeout_millis: default_min_timeout_millis(),
            default_timeout_millis: default_timeout_millis(),
            auth_flow_timeout_seconds: default_auth_flow_timeout_seconds(),
            timeout_fallback: TimeoutFallback::default(),
            allowed_system_apps: Vec::new(),
        }
    }
}

fn default_min_timeout_millis() -> i64 {
    5 * 1000
}

fn default_timeout_millis() -> i64 {
    DEFAULT_TIMEOUT_MILLIS
}

fn default_auth_flow_timeout_seconds() -> u64 {
    60
}

fn default_ipc_name() -> String {
    "app-lock".into()
}

/// How unknown packages are treated by the built-in package catalog.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatalogMode {
    /// Unregistered packages resolve as user apps labelled by name.
    #[default]
    Open,
    /// Only packages reported via `package_installed` resolve.
    Strict,
}

/// An IPC caller allowed to talk to the service.
///
/// The token is loaded at runtime via OS keychain or environment
/// variable, never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CallerConfig {
    /// Unique caller name, also the keychain entry suffix.
    pub name: String,
    /// User the caller acts for.
    pub user_id: u32,
    /// Granted permissions.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Shared-secret token (populated at runtime).
    #[serde(skip)]
    pub auth_token: String,
}

impl CallerConfig {
    /// Environment variable consulted when the keychain has no token.
    #[must_use]
    pub fn token_env_var(&self) -> String {
        format!(
            "APP_LOCK_TOKEN_{}",
            self.name.to_uppercase().replace(['-', '.'], "_")
        )
    }

    /// Identity handed to the policy service for this caller.
    #[must_use]
    pub fn identity(&self) -> Caller {
        Caller::new(
            self.name.clone(),
            UserId(self.user_id),
            self.permissions.clone(),
        )
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file holding protected packages and user policies.
    pub db_path: PathBuf,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Lock policy tunables.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Package catalog behaviour.
    #[serde(default)]
    pub catalog_mode: CatalogMode,
    /// Callers allowed to connect.
    #[serde(default)]
    pub callers: Vec<CallerConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load every caller token from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a token is missing or two callers
    /// share the same token.
    pub async fn load_credentials(&mut self) -> Result<()> {
        for caller in &mut self.callers {
            let env_key = caller.token_env_var();
            caller.auth_token = load_credential(&caller.name, &env_key).await?;
        }

        let mut seen = HashSet::new();
        for caller in &self.callers {
            if !seen.insert(caller.auth_token.as_str()) {
                return Err(AppError::Config(format!(
                    "caller {} reuses another caller's token",
                    caller.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve the caller presenting `token`.
    #[must_use]
    pub fn caller_for_token(&self, token: &str) -> Option<Caller> {
        self.callers
            .iter()
            .find(|caller| !caller.auth_token.is_empty() && caller.auth_token == token)
            .map(CallerConfig::identity)
    }

    /// Bound on a pending credential flow.
    #[must_use]
    pub fn auth_flow_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.auth_flow_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.policy.min_timeout_millis <= 0 {
            return Err(AppError::Config(
                "policy.min_timeout_millis must be greater than zero".into(),
            ));
        }

        if self.policy.default_timeout_millis < self.policy.min_timeout_millis {
            return Err(AppError::Config(
                "policy.default_timeout_millis must not be below policy.min_timeout_millis".into(),
            ));
        }

        if self.policy.auth_flow_timeout_seconds == 0 {
            return Err(AppError::Config(
                "policy.auth_flow_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        let mut names = HashSet::new();
        for caller in &self.callers {
            if caller.name.trim().is_empty() {
                return Err(AppError::Config("caller name must not be empty".into()));
            }
            if !names.insert(caller.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate caller name: {}",
                    caller.name
                )));
            }
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
