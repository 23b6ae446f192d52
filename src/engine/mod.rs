//! App lock policy engine.
//!
//! Leaves first: [`store`] persists membership and settings, [`tracker`]
//! owns runtime lock state, [`broker`] mediates credential flows through a
//! [`surface`], and [`service`] is the façade every caller goes through.

pub mod broker;
pub mod catalog;
pub mod service;
pub mod store;
pub mod surface;
pub mod tracker;

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::persistence::db::Database;
use crate::Result;

use self::broker::AuthenticationBroker;
use self::catalog::{InMemoryCatalog, PackageCatalog};
use self::service::PolicyService;
use self::store::PolicyStore;
use self::surface::{BroadcastSurface, CredentialSurface};
use self::tracker::LockStateTracker;

/// Wire the engine over `db` with the built-in catalog and `surface`.
///
/// # Errors
///
/// Returns `AppError::Config` if the service cannot be assembled.
pub fn build(
    config: &GlobalConfig,
    db: Arc<Database>,
    surface: Arc<dyn CredentialSurface>,
) -> Result<PolicyService> {
    let catalog: Arc<dyn PackageCatalog> = Arc::new(InMemoryCatalog::new(config.catalog_mode));
    build_with_catalog(config, db, surface, catalog)
}

/// Wire the engine with an explicit package catalog.
///
/// # Errors
///
/// Returns `AppError::Config` if the service cannot be assembled.
pub fn build_with_catalog(
    config: &GlobalConfig,
    db: Arc<Database>,
    surface: Arc<dyn CredentialSurface>,
    catalog: Arc<dyn PackageCatalog>,
) -> Result<PolicyService> {
    let store = PolicyStore::new(db, &config.policy);
    let tracker = LockStateTracker::new();
    let broker = AuthenticationBroker::new(tracker.clone(), surface, config.auth_flow_timeout());
    PolicyService::new(config, store, tracker, broker, catalog)
}

/// Convenience for the server binary: engine plus the surface IPC subscribers read.
///
/// # Errors
///
/// Returns `AppError::Config` if the service cannot be assembled.
pub fn build_broadcast(
    config: &GlobalConfig,
    db: Arc<Database>,
) -> Result<(PolicyService, BroadcastSurface)> {
    let surface = BroadcastSurface::new();
    let service = build(config, db, Arc::new(surface.clone()))?;
    Ok((service, surface))
}
