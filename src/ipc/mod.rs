//! Local IPC layer for app lock clients.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line commands from [`crate::client`] and the
//! `app-lock-ctl` companion.

pub mod codec;
pub mod protocol;
pub mod server;
