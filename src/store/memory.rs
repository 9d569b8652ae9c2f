//! In-memory implementation of the storage driver.
//!
//! # Purpose
//! Implements the catalog and user-pool traits entirely in memory using
//! `HashMap`s guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: write locks for mutations, read locks
//!   for reads.
//!
//! User pools are materialized on demand, keyed by the tenant's pool
//! selector, so tenants routed to the same pool share one handle.
use super::{CatalogStore, StorageDriver, StoreError, StoreResult, UserPoolStore};
use crate::model::{TenantConfig, TenantIdentifier};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryDriver {
    catalog: Arc<InMemoryCatalog>,
    pools: RwLock<HashMap<String, Arc<InMemoryUserPool>>>,
}

impl InMemoryDriver {
    /// Starts with the base tenant already in the catalog; a live process
    /// must always be able to resolve it.
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            pools: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageDriver for InMemoryDriver {
    fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.catalog.clone()
    }

    async fn user_pool(&self, tenant: &TenantConfig) -> StoreResult<Arc<dyn UserPoolStore>> {
        let pool_id = tenant.core_config.user_pool_id();
        let mut pools = self.pools.write().await;
        let pool = pools
            .entry(pool_id.clone())
            .or_insert_with(|| Arc::new(InMemoryUserPool::new(pool_id)))
            .clone();
        Ok(pool)
    }

    async fn retain_user_pools(&self, in_use: &HashSet<String>) {
        self.pools
            .write()
            .await
            .retain(|pool_id, _| in_use.contains(pool_id));
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

pub struct InMemoryCatalog {
    rows: RwLock<HashMap<TenantIdentifier, TenantConfig>>,
}

impl InMemoryCatalog {
    fn new() -> Self {
        let base = TenantConfig::with_defaults(TenantIdentifier::base());
        let mut rows = HashMap::new();
        rows.insert(base.identifier.clone(), base);
        Self {
            rows: RwLock::new(rows),
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn list_all_tenants(&self) -> StoreResult<Vec<TenantConfig>> {
        let rows = self.rows.read().await;
        let mut tenants: Vec<TenantConfig> = rows.values().cloned().collect();
        // Stable iteration order keeps snapshots and API listings predictable.
        tenants.sort_by(|a, b| {
            (
                &a.identifier.connection_uri_domain,
                &a.identifier.app_id,
                &a.identifier.tenant_id,
            )
                .cmp(&(
                    &b.identifier.connection_uri_domain,
                    &b.identifier.app_id,
                    &b.identifier.tenant_id,
                ))
        });
        Ok(tenants)
    }

    async fn create_tenant(&self, tenant: &TenantConfig) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&tenant.identifier) {
            return Err(StoreError::DuplicateTenant(tenant.identifier.clone()));
        }
        rows.insert(tenant.identifier.clone(), tenant.clone());
        Ok(())
    }

    async fn overwrite_tenant_config(&self, tenant: &TenantConfig) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let existing = rows
            .get_mut(&tenant.identifier)
            .ok_or_else(|| StoreError::UnknownTenant(tenant.identifier.clone()))?;
        // The soft-delete flags belong to the mark operations, not to the
        // incoming config.
        let mut replacement = tenant.clone();
        replacement.app_id_marked_as_deleted = existing.app_id_marked_as_deleted;
        replacement.connection_uri_domain_marked_as_deleted =
            existing.connection_uri_domain_marked_as_deleted;
        *existing = replacement;
        Ok(())
    }

    async fn delete_tenant(&self, identifier: &TenantIdentifier) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.remove(identifier).is_none() {
            return Err(StoreError::UnknownTenant(identifier.clone()));
        }
        Ok(())
    }

    async fn mark_app_id_as_deleted(&self, app_id: &str) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        for row in rows.values_mut() {
            if row.identifier.app_id == app_id {
                row.app_id_marked_as_deleted = true;
            }
        }
        Ok(())
    }

    async fn mark_connection_uri_domain_as_deleted(&self, domain: &str) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        for row in rows.values_mut() {
            if row.identifier.connection_uri_domain == domain {
                row.connection_uri_domain_marked_as_deleted = true;
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// One simulated physical user-pool database.
pub struct InMemoryUserPool {
    pool_id: String,
    members: RwLock<HashSet<TenantIdentifier>>,
    users: RwLock<HashMap<String, HashSet<TenantIdentifier>>>,
    roles: RwLock<HashMap<String, Vec<String>>>,
    role_tenants: RwLock<HashMap<String, HashSet<TenantIdentifier>>>,
}

impl InMemoryUserPool {
    fn new(pool_id: String) -> Self {
        Self {
            pool_id,
            members: RwLock::new(HashSet::new()),
            users: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            role_tenants: RwLock::new(HashMap::new()),
        }
    }

}

#[async_trait]
impl UserPoolStore for InMemoryUserPool {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    async fn add_tenant_id_in_user_pool(&self, identifier: &TenantIdentifier) -> StoreResult<()> {
        let mut members = self.members.write().await;
        // A non-default tenant can only join a pool whose parent app is
        // already represented by its default tenant.
        if !identifier.is_default_tenant() && !members.contains(&identifier.app_default()) {
            return Err(StoreError::TenantOrAppNotFound(identifier.clone()));
        }
        members.insert(identifier.clone());
        Ok(())
    }

    async fn delete_tenant_id_in_user_pool(
        &self,
        identifier: &TenantIdentifier,
    ) -> StoreResult<()> {
        let mut members = self.members.write().await;
        if !members.remove(identifier) {
            return Err(StoreError::UnknownTenant(identifier.clone()));
        }
        Ok(())
    }

    async fn add_user_id_to_tenant(
        &self,
        identifier: &TenantIdentifier,
        user_id: &str,
    ) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let tenants = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UnknownUserId(user_id.to_string()))?;
        tenants.insert(identifier.clone());
        Ok(())
    }

    async fn add_role_to_tenant(
        &self,
        identifier: &TenantIdentifier,
        role: &str,
    ) -> StoreResult<()> {
        if !self.roles.read().await.contains_key(role) {
            return Err(StoreError::UnknownRole(role.to_string()));
        }
        self.role_tenants
            .write()
            .await
            .entry(role.to_string())
            .or_default()
            .insert(identifier.clone());
        Ok(())
    }

    async fn get_permissions_for_role(&self, role: &str) -> StoreResult<Vec<String>> {
        self.roles
            .read()
            .await
            .get(role)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRole(role.to_string()))
    }

    async fn create_user(&self, user_id: &str) -> StoreResult<()> {
        self.users
            .write()
            .await
            .entry(user_id.to_string())
            .or_default();
        Ok(())
    }

    async fn create_role(&self, role: &str, permissions: &[String]) -> StoreResult<()> {
        self.roles
            .write()
            .await
            .insert(role.to_string(), permissions.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_TENANT_ID;

    fn tenant(domain: Option<&str>, app: Option<&str>, id: Option<&str>) -> TenantConfig {
        TenantConfig::with_defaults(TenantIdentifier::new(domain, app, id))
    }

    #[tokio::test]
    async fn catalog_seeds_base_tenant_and_detects_duplicates() {
        let driver = InMemoryDriver::new();
        let catalog = driver.catalog();
        let rows = catalog.list_all_tenants().await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identifier, TenantIdentifier::base());

        let err = catalog
            .create_tenant(&tenant(None, None, None))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateTenant(_)));
    }

    #[tokio::test]
    async fn overwrite_preserves_soft_delete_flags() {
        let driver = InMemoryDriver::new();
        let catalog = driver.catalog();
        let custom = tenant(Some("c1"), None, None);
        catalog.create_tenant(&custom).await.expect("create");
        catalog
            .mark_connection_uri_domain_as_deleted("c1")
            .await
            .expect("mark");

        let mut replacement = custom.clone();
        replacement.email_password.enabled = false;
        catalog
            .overwrite_tenant_config(&replacement)
            .await
            .expect("overwrite");

        let rows = catalog.list_all_tenants().await.expect("list");
        let row = rows
            .iter()
            .find(|r| r.identifier == custom.identifier)
            .expect("row");
        assert!(!row.email_password.enabled);
        assert!(row.connection_uri_domain_marked_as_deleted);
    }

    #[tokio::test]
    async fn user_pool_handles_are_shared_by_pool_id() {
        let driver = InMemoryDriver::new();
        let mut a = tenant(Some("c1"), None, None);
        a.core_config.set("user_pool_id", serde_json::json!(2));
        let mut b = tenant(Some("c1"), None, Some("t1"));
        b.core_config.set("user_pool_id", serde_json::json!(2));
        let c = tenant(None, None, None);

        let pool_a = driver.user_pool(&a).await.expect("pool a");
        let pool_b = driver.user_pool(&b).await.expect("pool b");
        let pool_c = driver.user_pool(&c).await.expect("pool c");
        assert!(Arc::ptr_eq(&pool_a, &pool_b));
        assert!(!Arc::ptr_eq(&pool_a, &pool_c));
        assert_eq!(pool_c.pool_id(), "0");
    }

    #[tokio::test]
    async fn pool_membership_requires_parent_app() {
        let driver = InMemoryDriver::new();
        let config = tenant(Some("c1"), None, None);
        let pool = driver.user_pool(&config).await.expect("pool");

        let child = TenantIdentifier::new(Some("c1"), None, Some("t1"));
        let err = pool
            .add_tenant_id_in_user_pool(&child)
            .await
            .expect_err("parent missing");
        assert!(matches!(err, StoreError::TenantOrAppNotFound(_)));

        let app_default = child.app_default();
        assert_eq!(app_default.tenant_id, DEFAULT_TENANT_ID);
        pool.add_tenant_id_in_user_pool(&app_default)
            .await
            .expect("app default");
        pool.add_tenant_id_in_user_pool(&child).await.expect("child");

        pool.delete_tenant_id_in_user_pool(&child)
            .await
            .expect("delete");
        let err = pool
            .delete_tenant_id_in_user_pool(&child)
            .await
            .expect_err("gone");
        assert!(matches!(err, StoreError::UnknownTenant(_)));
    }

    #[tokio::test]
    async fn user_and_role_operations_surface_domain_errors() {
        let driver = InMemoryDriver::new();
        let config = tenant(None, None, None);
        let pool = driver.user_pool(&config).await.expect("pool");
        let target = TenantIdentifier::new(None, None, Some("t1"));

        let err = pool
            .add_user_id_to_tenant(&target, "u1")
            .await
            .expect_err("unknown user");
        assert!(matches!(err, StoreError::UnknownUserId(_)));

        pool.create_user("u1").await.expect("user");
        pool.add_user_id_to_tenant(&target, "u1")
            .await
            .expect("associate");

        let err = pool
            .add_role_to_tenant(&target, "admin")
            .await
            .expect_err("unknown role");
        assert!(matches!(err, StoreError::UnknownRole(_)));

        pool.create_role("admin", &["read".to_string(), "write".to_string()])
            .await
            .expect("role");
        pool.add_role_to_tenant(&target, "admin")
            .await
            .expect("associate role");
        let permissions = pool.get_permissions_for_role("admin").await.expect("perms");
        assert_eq!(permissions, vec!["read".to_string(), "write".to_string()]);
    }
}
