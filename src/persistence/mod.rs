//! Persistence layer modules.

pub mod db;
pub mod package_repo;
pub mod schema;
pub mod user_policy_repo;
