//! Tenant admin orchestration.
//!
//! # Purpose
//! The write surface of the control plane: create/update/delete tenant,
//! soft-delete app and connection-URI domain, user/role association, and the
//! reconciling read queries. Every write touches the shared catalog first and
//! then forces a reconcile, so a successful call is observable through
//! `resolve` immediately.
//!
//! # Notes
//! The catalog and the user-pool stores are not updated atomically. The
//! add-or-update protocol repairs a half-applied earlier attempt (shared row
//! written, pool membership missing) and retries, with a bounded budget,
//! when a concurrent delete removes the parent mid-flight.
use super::Multitenancy;
use crate::model::{TenantConfig, TenantIdentifier};
use crate::store::{StoreError, UserPoolStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ADD_OR_UPDATE_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("cannot delete the default tenant")]
    CannotDeleteDefaultTenant,
    #[error("cannot delete the default app")]
    CannotDeleteDefaultApp,
    #[error("cannot delete the default connection uri domain")]
    CannotDeleteDefaultConnectionUriDomain,
    #[error("{0} must target the default tenant")]
    NonDefaultTenant(&'static str),
    #[error("{0} must target the default app")]
    NonDefaultApp(&'static str),
    #[error("{0} must target the base connection uri domain")]
    NonDefaultConnectionUriDomain(&'static str),
    #[error("source and target tenant are the same")]
    SameTenantMove,
    #[error("retry budget exhausted while writing tenant")]
    RetriesExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Attempt {
    Done(bool),
    Retry,
}

impl Multitenancy {
    /// Create the tenant, or overwrite its configuration when the identifier
    /// already exists. Returns `true` iff a new catalog row was created by
    /// this call.
    pub async fn add_or_update(&self, tenant: TenantConfig) -> Result<bool, AdminError> {
        metrics::counter!("gatehouse_admin_ops_total", "op" => "add_or_update").increment(1);
        for attempt in 0..ADD_OR_UPDATE_RETRY_BUDGET {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            match self.try_add_or_update(&tenant).await? {
                Attempt::Done(created) => return Ok(created),
                Attempt::Retry => continue,
            }
        }
        Err(AdminError::RetriesExhausted)
    }

    async fn try_add_or_update(&self, tenant: &TenantConfig) -> Result<Attempt, AdminError> {
        let catalog = self.driver.catalog();
        match catalog.create_tenant(tenant).await {
            Ok(()) => {
                self.refresh_if_required().await;
                let pool = self.routed_user_pool(tenant).await?;
                match pool.add_tenant_id_in_user_pool(&tenant.identifier).await {
                    Ok(()) => Ok(Attempt::Done(true)),
                    // The parent app was deleted while we were writing; start
                    // over against the current catalog state.
                    Err(StoreError::TenantOrAppNotFound(_)) => Ok(Attempt::Retry),
                    Err(err) => Err(err.into()),
                }
            }
            Err(StoreError::DuplicateTenant(_)) => {
                match catalog.overwrite_tenant_config(tenant).await {
                    Ok(()) => {
                        self.refresh_if_required().await;
                        // An earlier attempt may have written the shared row
                        // but died before the pool membership write; re-issue
                        // it so the two stores converge.
                        let pool = self.routed_user_pool(tenant).await?;
                        match pool.add_tenant_id_in_user_pool(&tenant.identifier).await {
                            Ok(()) => Ok(Attempt::Done(false)),
                            Err(
                                StoreError::TenantOrAppNotFound(_) | StoreError::UnknownTenant(_),
                            ) => Ok(Attempt::Retry),
                            Err(err) => Err(err.into()),
                        }
                    }
                    // The tenant was deleted in the middle of being recreated.
                    Err(StoreError::UnknownTenant(_)) => Ok(Attempt::Retry),
                    Err(StoreError::DuplicateTenant(_)) => Ok(Attempt::Done(false)),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a tenant: best-effort removal from its user pool, then the
    /// authoritative catalog row, then reconcile. The base tenant is not
    /// deletable.
    pub async fn delete_tenant(&self, identifier: &TenantIdentifier) -> Result<(), AdminError> {
        metrics::counter!("gatehouse_admin_ops_total", "op" => "delete_tenant").increment(1);
        if *identifier == TenantIdentifier::base() {
            return Err(AdminError::CannotDeleteDefaultTenant);
        }
        if let Some(config) = self.resolve(identifier).await {
            let pool = self.routed_user_pool(&config).await?;
            match pool.delete_tenant_id_in_user_pool(identifier).await {
                // A past deletion attempt may have already removed the
                // membership row without reaching the catalog.
                Ok(()) | Err(StoreError::UnknownTenant(_) | StoreError::TenantOrAppNotFound(_)) => {
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.driver.catalog().delete_tenant(identifier).await?;
        self.refresh_if_required().await;
        Ok(())
    }

    /// Soft-delete an app. Only permitted through the app's default tenant;
    /// physical cleanup across pools is the janitor cron's job.
    pub async fn delete_app(&self, identifier: &TenantIdentifier) -> Result<(), AdminError> {
        metrics::counter!("gatehouse_admin_ops_total", "op" => "delete_app").increment(1);
        if !identifier.is_default_tenant() {
            return Err(AdminError::NonDefaultTenant("delete_app"));
        }
        if identifier.is_default_app() {
            return Err(AdminError::CannotDeleteDefaultApp);
        }
        self.driver
            .catalog()
            .mark_app_id_as_deleted(&identifier.app_id)
            .await?;
        self.refresh_if_required().await;
        Ok(())
    }

    /// Soft-delete a connection-URI domain. Only permitted through the
    /// domain's default app and tenant.
    pub async fn delete_connection_uri_domain(
        &self,
        identifier: &TenantIdentifier,
    ) -> Result<(), AdminError> {
        metrics::counter!("gatehouse_admin_ops_total", "op" => "delete_connection_uri_domain")
            .increment(1);
        if !identifier.is_default_tenant() {
            return Err(AdminError::NonDefaultTenant("delete_connection_uri_domain"));
        }
        if !identifier.is_default_app() {
            return Err(AdminError::NonDefaultApp("delete_connection_uri_domain"));
        }
        if identifier.is_default_connection_uri_domain() {
            return Err(AdminError::CannotDeleteDefaultConnectionUriDomain);
        }
        self.driver
            .catalog()
            .mark_connection_uri_domain_as_deleted(&identifier.connection_uri_domain)
            .await?;
        self.refresh_if_required().await;
        Ok(())
    }

    /// Associate a user of the source tenant's pool with a sibling tenant.
    pub async fn add_user_id_to_tenant(
        &self,
        source: &TenantIdentifier,
        user_id: &str,
        new_tenant_id: &str,
    ) -> Result<(), AdminError> {
        let target = source.with_tenant_id(new_tenant_id);
        if target == *source {
            return Err(AdminError::SameTenantMove);
        }
        let pool = self.source_pool(source).await?;
        pool.add_user_id_to_tenant(&target, user_id).await?;
        Ok(())
    }

    /// Associate a role of the source tenant's pool with a sibling tenant.
    pub async fn add_role_to_tenant(
        &self,
        source: &TenantIdentifier,
        role: &str,
        new_tenant_id: &str,
    ) -> Result<(), AdminError> {
        let target = source.with_tenant_id(new_tenant_id);
        if target == *source {
            return Err(AdminError::SameTenantMove);
        }
        let pool = self.source_pool(source).await?;
        pool.add_role_to_tenant(&target, role).await?;
        Ok(())
    }

    /// Reconcile, then look the tenant up in the fresh snapshot.
    pub async fn get_tenant_info(&self, identifier: &TenantIdentifier) -> Option<TenantConfig> {
        self.refresh_if_required().await;
        self.resolve(identifier).await
    }

    /// Visible tenants sharing the identifier's app id. Must be called on the
    /// app's default tenant.
    pub async fn get_all_tenants_for_app(
        &self,
        identifier: &TenantIdentifier,
    ) -> Result<Vec<TenantConfig>, AdminError> {
        if !identifier.is_default_tenant() {
            return Err(AdminError::NonDefaultTenant("get_all_tenants_for_app"));
        }
        self.refresh_if_required().await;
        let snapshot = self.tenant_snapshot().await;
        Ok(snapshot
            .iter()
            .filter(|t| t.identifier.app_id == identifier.app_id)
            .cloned()
            .collect())
    }

    /// Visible tenants sharing the identifier's connection-URI domain. Must
    /// be called on the domain's default app and tenant.
    pub async fn get_all_tenants_for_connection_uri_domain(
        &self,
        identifier: &TenantIdentifier,
    ) -> Result<Vec<TenantConfig>, AdminError> {
        if !identifier.is_default_tenant() {
            return Err(AdminError::NonDefaultTenant(
                "get_all_tenants_for_connection_uri_domain",
            ));
        }
        if !identifier.is_default_app() {
            return Err(AdminError::NonDefaultApp(
                "get_all_tenants_for_connection_uri_domain",
            ));
        }
        self.refresh_if_required().await;
        let snapshot = self.tenant_snapshot().await;
        Ok(snapshot
            .iter()
            .filter(|t| t.identifier.connection_uri_domain == identifier.connection_uri_domain)
            .cloned()
            .collect())
    }

    /// The full visible snapshot. Must be called on the base identifier.
    pub async fn get_all_tenants(
        &self,
        identifier: &TenantIdentifier,
    ) -> Result<Vec<TenantConfig>, AdminError> {
        if !identifier.is_default_tenant() {
            return Err(AdminError::NonDefaultTenant("get_all_tenants"));
        }
        if !identifier.is_default_app() {
            return Err(AdminError::NonDefaultApp("get_all_tenants"));
        }
        if !identifier.is_default_connection_uri_domain() {
            return Err(AdminError::NonDefaultConnectionUriDomain("get_all_tenants"));
        }
        self.refresh_if_required().await;
        Ok(self.tenant_snapshot().await.as_ref().clone())
    }

    /// Pool routed by the tenant's merged core config.
    async fn routed_user_pool(
        &self,
        tenant: &TenantConfig,
    ) -> Result<Arc<dyn UserPoolStore>, StoreError> {
        let mut routed = tenant.clone();
        routed.core_config = tenant.core_config.merged_over(&self.base_config);
        self.driver.user_pool(&routed).await
    }

    /// Storage hosting the source tenant of a user/role move.
    async fn source_pool(
        &self,
        source: &TenantIdentifier,
    ) -> Result<Arc<dyn UserPoolStore>, AdminError> {
        let config = self
            .resolve(source)
            .await
            .ok_or_else(|| StoreError::UnknownTenant(source.clone()))?;
        Ok(self.routed_user_pool(&config).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlags;
    use crate::cron::Cronjobs;
    use crate::model::CoreConfig;
    use crate::store::memory::InMemoryDriver;
    use crate::store::{CatalogStore, StorageDriver, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Driver whose user pools refuse membership writes a fixed number of
    /// times, standing in for a parent deleted mid-flight.
    struct FlakyDriver {
        inner: InMemoryDriver,
        failures_left: Arc<AtomicUsize>,
    }

    struct FlakyPool {
        inner: Arc<dyn UserPoolStore>,
        failures_left: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StorageDriver for FlakyDriver {
        fn catalog(&self) -> Arc<dyn CatalogStore> {
            self.inner.catalog()
        }

        async fn user_pool(&self, tenant: &TenantConfig) -> StoreResult<Arc<dyn UserPoolStore>> {
            let inner = self.inner.user_pool(tenant).await?;
            Ok(Arc::new(FlakyPool {
                inner,
                failures_left: self.failures_left.clone(),
            }))
        }

        async fn retain_user_pools(&self, in_use: &std::collections::HashSet<String>) {
            self.inner.retain_user_pools(in_use).await;
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[async_trait]
    impl UserPoolStore for FlakyPool {
        fn pool_id(&self) -> &str {
            self.inner.pool_id()
        }

        async fn add_tenant_id_in_user_pool(
            &self,
            identifier: &TenantIdentifier,
        ) -> StoreResult<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::TenantOrAppNotFound(identifier.clone()));
            }
            self.inner.add_tenant_id_in_user_pool(identifier).await
        }

        async fn delete_tenant_id_in_user_pool(
            &self,
            identifier: &TenantIdentifier,
        ) -> StoreResult<()> {
            self.inner.delete_tenant_id_in_user_pool(identifier).await
        }

        async fn add_user_id_to_tenant(
            &self,
            identifier: &TenantIdentifier,
            user_id: &str,
        ) -> StoreResult<()> {
            self.inner.add_user_id_to_tenant(identifier, user_id).await
        }

        async fn add_role_to_tenant(
            &self,
            identifier: &TenantIdentifier,
            role: &str,
        ) -> StoreResult<()> {
            self.inner.add_role_to_tenant(identifier, role).await
        }

        async fn get_permissions_for_role(&self, role: &str) -> StoreResult<Vec<String>> {
            self.inner.get_permissions_for_role(role).await
        }

        async fn create_user(&self, user_id: &str) -> StoreResult<()> {
            self.inner.create_user(user_id).await
        }

        async fn create_role(&self, role: &str, permissions: &[String]) -> StoreResult<()> {
            self.inner.create_role(role, permissions).await
        }
    }

    fn fleet_with_failures(failures: usize) -> (Arc<Multitenancy>, Arc<AtomicUsize>) {
        let failures_left = Arc::new(AtomicUsize::new(failures));
        let driver = Arc::new(FlakyDriver {
            inner: InMemoryDriver::new(),
            failures_left: failures_left.clone(),
        });
        let fleet = Multitenancy::new(
            driver,
            Cronjobs::new(),
            FeatureFlags { multi_tenancy: true },
            CoreConfig::new(),
        );
        (fleet, failures_left)
    }

    #[tokio::test]
    async fn add_or_update_retries_past_transient_pool_failures() {
        let (fleet, failures_left) = fleet_with_failures(2);
        fleet.refresh_if_required().await;

        let tenant =
            TenantConfig::with_defaults(TenantIdentifier::new(Some("c1"), None, None));
        // The first attempt writes the shared row, so the attempt that
        // finally lands the pool membership reports an overwrite.
        let created = fleet.add_or_update(tenant.clone()).await.expect("converged");
        assert!(!created);
        assert_eq!(failures_left.load(Ordering::SeqCst), 0);
        assert!(fleet.resolve(&tenant.identifier).await.is_some());
    }

    #[tokio::test]
    async fn add_or_update_gives_up_after_the_retry_budget() {
        let (fleet, _) = fleet_with_failures(usize::MAX);
        fleet.refresh_if_required().await;

        let tenant =
            TenantConfig::with_defaults(TenantIdentifier::new(Some("c1"), None, None));
        let err = fleet.add_or_update(tenant).await.expect_err("exhausted");
        assert!(matches!(err, AdminError::RetriesExhausted));
    }
}
