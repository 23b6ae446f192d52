//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// IPC communication failure.
    Ipc(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The credential surface could not be reached.
    Surface(String),
    /// Caller lacks the grant required for the operation.
    PermissionDenied(String),
    /// Package (or user) is not under app lock protection.
    NotProtected(String),
    /// Package is already under app lock protection.
    AlreadyProtected(String),
    /// Argument failed validation.
    InvalidArgument(String),
    /// An authentication flow is already outstanding for the package.
    AlreadyPending(String),
    /// A credential flow exceeded its lifetime bound. Never returned to callers.
    AuthenticationTimeout(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl AppError {
    /// Stable machine-readable kind used on the IPC wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Db(_) => "db",
            Self::Ipc(_) => "ipc",
            Self::Io(_) => "io",
            Self::Surface(_) => "surface",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotProtected(_) => "not_protected",
            Self::AlreadyProtected(_) => "already_protected",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AlreadyPending(_) => "already_pending",
            Self::AuthenticationTimeout(_) => "authentication_timeout",
            Self::NotFound(_) => "not_found",
        }
    }

    /// Message carried by the error, without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Db(msg)
            | Self::Ipc(msg)
            | Self::Io(msg)
            | Self::Surface(msg)
            | Self::PermissionDenied(msg)
            | Self::NotProtected(msg)
            | Self::AlreadyProtected(msg)
            | Self::InvalidArgument(msg)
            | Self::AlreadyPending(msg)
            | Self::AuthenticationTimeout(msg)
            | Self::NotFound(msg) => msg,
        }
    }

    /// Rebuild an error from its wire `kind` and message.
    ///
    /// Unknown kinds map to [`AppError::Ipc`] so a newer server never
    /// produces an error the client cannot represent.
    #[must_use]
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "config" => Self::Config(message),
            "db" => Self::Db(message),
            "io" => Self::Io(message),
            "surface" => Self::Surface(message),
            "permission_denied" => Self::PermissionDenied(message),
            "not_protected" => Self::NotProtected(message),
            "already_protected" => Self::AlreadyProtected(message),
            "invalid_argument" => Self::InvalidArgument(message),
            "already_pending" => Self::AlreadyPending(message),
            "authentication_timeout" => Self::AuthenticationTimeout(message),
            "not_found" => Self::NotFound(message),
            _ => Self::Ipc(message),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Surface(msg) => write!(f, "surface: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::NotProtected(msg) => write!(f, "not protected: {msg}"),
            Self::AlreadyProtected(msg) => write!(f, "already protected: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::AlreadyPending(msg) => write!(f, "already pending: {msg}"),
            Self::AuthenticationTimeout(msg) => write!(f, "authentication timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Ipc(format!("invalid json: {err}"))
    }
}
