#![forbid(unsafe_code)]

//! Per-user application lock policy engine.
//!
//! Persists which packages each user protects, tracks their runtime lock
//! state, brokers credential flows, and serves all of it to privileged
//! callers over a local socket.

pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
