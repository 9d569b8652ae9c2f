//! Storage driver seam for the tenant catalog and the per-tenant user pools.
//!
//! # Purpose
//! Defines the `CatalogStore` and `UserPoolStore` traits the control plane
//! consumes, the `StorageDriver` factory that routes tenants to physical
//! pools, and the typed error surface shared by all backends.
//!
//! # Notes
//! Operations are transactional only within one store; cross-store atomicity
//! is explicitly not provided. The admin flows in `multitenancy` recover from
//! partial failures instead.
use crate::model::{TenantConfig, TenantIdentifier};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate tenant: {0}")]
    DuplicateTenant(TenantIdentifier),
    #[error("unknown tenant: {0}")]
    UnknownTenant(TenantIdentifier),
    #[error("tenant or app not found: {0}")]
    TenantOrAppNotFound(TenantIdentifier),
    #[error("unknown user id: {0}")]
    UnknownUserId(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("database initialization failed: {0}")]
    DbInit(String),
    #[error(transparent)]
    Query(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD over tenant rows in the shared database. Not tenant-scoped.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every row, including soft-deleted ones. Callers filter visibility.
    async fn list_all_tenants(&self) -> StoreResult<Vec<TenantConfig>>;

    /// Fails with [`StoreError::DuplicateTenant`] on identifier collision.
    async fn create_tenant(&self, tenant: &TenantConfig) -> StoreResult<()>;

    /// Replaces the configuration of an existing row, preserving its
    /// soft-delete flags. Fails with [`StoreError::UnknownTenant`] when the
    /// identifier is absent.
    async fn overwrite_tenant_config(&self, tenant: &TenantConfig) -> StoreResult<()>;

    /// Fails with [`StoreError::UnknownTenant`] when the identifier is absent.
    async fn delete_tenant(&self, identifier: &TenantIdentifier) -> StoreResult<()>;

    /// Idempotent soft delete of every row under the app.
    async fn mark_app_id_as_deleted(&self, app_id: &str) -> StoreResult<()>;

    /// Idempotent soft delete of every row under the connection-URI domain.
    async fn mark_connection_uri_domain_as_deleted(&self, domain: &str) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Operations against the physical database hosting one user pool. One pool
/// may host several tenants; handles for equal pool ids are shared.
#[async_trait]
pub trait UserPoolStore: Send + Sync {
    fn pool_id(&self) -> &str;

    /// Records membership of a tenant inside this pool. Fails with
    /// [`StoreError::TenantOrAppNotFound`] when the pool no longer recognizes
    /// the parent app (its default tenant is not a member and the identifier
    /// is not itself an app-default tenant).
    async fn add_tenant_id_in_user_pool(&self, identifier: &TenantIdentifier) -> StoreResult<()>;

    async fn delete_tenant_id_in_user_pool(&self, identifier: &TenantIdentifier)
        -> StoreResult<()>;

    /// Fails with [`StoreError::UnknownUserId`] when the pool has no such user.
    async fn add_user_id_to_tenant(
        &self,
        identifier: &TenantIdentifier,
        user_id: &str,
    ) -> StoreResult<()>;

    /// Fails with [`StoreError::UnknownRole`] when the pool has no such role.
    async fn add_role_to_tenant(
        &self,
        identifier: &TenantIdentifier,
        role: &str,
    ) -> StoreResult<()>;

    /// Fails with [`StoreError::UnknownRole`] when the pool has no such role.
    async fn get_permissions_for_role(&self, role: &str) -> StoreResult<Vec<String>>;

    /// Registers a user in this pool. Idempotent.
    async fn create_user(&self, user_id: &str) -> StoreResult<()>;

    /// Registers a role with its permission set in this pool. Overwrites.
    async fn create_role(&self, role: &str, permissions: &[String]) -> StoreResult<()>;
}

/// Factory over the physical storage backends. `user_pool` must return the
/// same handle for two tenant configs selecting the same pool, which is what
/// makes the storage-sharing invariant of the fleet hold.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn catalog(&self) -> Arc<dyn CatalogStore>;

    /// Opens (or returns the already-open handle of) the pool hosting the
    /// tenant. Fails with [`StoreError::DbInit`] when the pool cannot be
    /// brought up.
    async fn user_pool(&self, tenant: &TenantConfig) -> StoreResult<Arc<dyn UserPoolStore>>;

    /// Drops cached handles of pools not in `in_use`; physical connections
    /// close once the last fleet reference is gone.
    async fn retain_user_pools(&self, in_use: &HashSet<String>);

    fn backend_name(&self) -> &'static str;
}
