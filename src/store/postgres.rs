//! Postgres-backed implementation of the storage driver.
//!
//! # What this module is
//! Implements the `CatalogStore` and `UserPoolStore` traits using Postgres
//! (via `sqlx`). The shared catalog lives in one database; each user pool is
//! its own database reached through the pool selector in a tenant's core
//! config (`user_pool_id` plus, optionally, `user_pool_connection_uri`).
//!
//! # Data model
//! - `tenant_configs`: authoritative catalog rows, keyed by the identifier
//!   triple, with JSONB columns for the recipe and core configs and two
//!   boolean soft-delete markers.
//! - Per-pool tables (`tenant_membership`, `pool_users`, `user_tenants`,
//!   `pool_roles`, `role_tenants`): tenant-targeted state.
//!
//! # Operational notes
//! - Catalog migrations run at connect time, before the process serves
//!   requests. Pool migrations run when a pool handle is first opened.
//! - Pool schema versions are offset (101+) and both migrators ignore
//!   versions they do not own, so a pool may share a physical database with
//!   the catalog.
//! - Connection pools carry explicit acquire timeouts; a hung database must
//!   surface as an error, not a stuck request handler.
use super::{CatalogStore, StorageDriver, StoreError, StoreResult, UserPoolStore};
use crate::config::PostgresConfig;
use crate::model::{
    CoreConfig, EmailPasswordConfig, PasswordlessConfig, TenantConfig, TenantIdentifier,
    ThirdPartyConfig,
};
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct PostgresDriver {
    catalog: Arc<PostgresCatalog>,
    config: PostgresConfig,
    pools: RwLock<HashMap<String, Arc<PostgresUserPool>>>,
}

impl PostgresDriver {
    /// Connect to the catalog database and run its migrations.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = open_pool(&config.url, config).await?;
        let mut migrator = sqlx::migrate!("./migrations/catalog");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|e| StoreError::DbInit(format!("catalog migrations: {e}")))?;
        Ok(Self {
            catalog: Arc::new(PostgresCatalog { pool }),
            config: config.clone(),
            pools: RwLock::new(HashMap::new()),
        })
    }
}

async fn open_pool(url: &str, config: &PostgresConfig) -> StoreResult<PgPool> {
    let options =
        PgConnectOptions::from_str(url).map_err(|e| StoreError::DbInit(e.to_string()))?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await
        .map_err(|e| StoreError::DbInit(e.to_string()))
}

#[async_trait]
impl StorageDriver for PostgresDriver {
    fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.catalog.clone()
    }

    async fn user_pool(&self, tenant: &TenantConfig) -> StoreResult<Arc<dyn UserPoolStore>> {
        let pool_id = tenant.core_config.user_pool_id();
        if let Some(existing) = self.pools.read().await.get(&pool_id) {
            return Ok(existing.clone());
        }

        let url = tenant
            .core_config
            .user_pool_connection_uri()
            .unwrap_or(&self.config.url)
            .to_string();
        let pg = open_pool(&url, &self.config).await?;
        let mut migrator = sqlx::migrate!("./migrations/userpool");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pg)
            .await
            .map_err(|e| StoreError::DbInit(format!("user pool {pool_id} migrations: {e}")))?;

        let mut pools = self.pools.write().await;
        // Another opener may have won the race while we were migrating.
        let pool = pools
            .entry(pool_id.clone())
            .or_insert_with(|| Arc::new(PostgresUserPool { pool_id, pool: pg }))
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
        "postgres"
    }
}

/// Row shape of the `tenant_configs` table. Kept separate from the domain
/// model so schema details stay localized here.
#[derive(Debug, FromRow)]
struct DbTenantConfig {
    connection_uri_domain: String,
    app_id: String,
    tenant_id: String,
    email_password: Value,
    third_party: Value,
    passwordless: Value,
    core_config: Value,
    app_id_marked_as_deleted: bool,
    connection_uri_domain_marked_as_deleted: bool,
}

impl DbTenantConfig {
    fn into_model(self) -> StoreResult<TenantConfig> {
        Ok(TenantConfig {
            identifier: TenantIdentifier::new(
                Some(&self.connection_uri_domain),
                Some(&self.app_id),
                Some(&self.tenant_id),
            ),
            email_password: serde_json::from_value::<EmailPasswordConfig>(self.email_password)
                .map_err(|e| StoreError::Query(anyhow!("email_password column: {e}")))?,
            third_party: serde_json::from_value::<ThirdPartyConfig>(self.third_party)
                .map_err(|e| StoreError::Query(anyhow!("third_party column: {e}")))?,
            passwordless: serde_json::from_value::<PasswordlessConfig>(self.passwordless)
                .map_err(|e| StoreError::Query(anyhow!("passwordless column: {e}")))?,
            core_config: serde_json::from_value::<CoreConfig>(self.core_config)
                .map_err(|e| StoreError::Query(anyhow!("core_config column: {e}")))?,
            app_id_marked_as_deleted: self.app_id_marked_as_deleted,
            connection_uri_domain_marked_as_deleted: self.connection_uri_domain_marked_as_deleted,
        })
    }
}

pub struct PostgresCatalog {
    pool: PgPool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn query_err(err: sqlx::Error) -> StoreError {
    StoreError::Query(err.into())
}

#[async_trait]
impl CatalogStore for PostgresCatalog {
    async fn list_all_tenants(&self) -> StoreResult<Vec<TenantConfig>> {
        let rows = sqlx::query_as::<_, DbTenantConfig>(
            r#"SELECT connection_uri_domain, app_id, tenant_id, email_password, third_party,
                      passwordless, core_config, app_id_marked_as_deleted,
                      connection_uri_domain_marked_as_deleted
               FROM tenant_configs
               ORDER BY connection_uri_domain, app_id, tenant_id"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;
        rows.into_iter().map(DbTenantConfig::into_model).collect()
    }

    async fn create_tenant(&self, tenant: &TenantConfig) -> StoreResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO tenant_configs
                   (connection_uri_domain, app_id, tenant_id, email_password, third_party,
                    passwordless, core_config)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&tenant.identifier.connection_uri_domain)
        .bind(&tenant.identifier.app_id)
        .bind(&tenant.identifier.tenant_id)
        .bind(serde_json::to_value(&tenant.email_password).map_err(|e| anyhow!(e))?)
        .bind(serde_json::to_value(&tenant.third_party).map_err(|e| anyhow!(e))?)
        .bind(serde_json::to_value(&tenant.passwordless).map_err(|e| anyhow!(e))?)
        .bind(serde_json::to_value(&tenant.core_config).map_err(|e| anyhow!(e))?)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::DuplicateTenant(tenant.identifier.clone()))
            }
            Err(err) => Err(query_err(err)),
        }
    }

    async fn overwrite_tenant_config(&self, tenant: &TenantConfig) -> StoreResult<()> {
        // Soft-delete flags are owned by the mark operations and left as-is.
        let result = sqlx::query(
            r#"UPDATE tenant_configs
               SET email_password = $4, third_party = $5, passwordless = $6, core_config = $7
               WHERE connection_uri_domain = $1 AND app_id = $2 AND tenant_id = $3"#,
        )
        .bind(&tenant.identifier.connection_uri_domain)
        .bind(&tenant.identifier.app_id)
        .bind(&tenant.identifier.tenant_id)
        .bind(serde_json::to_value(&tenant.email_password).map_err(|e| anyhow!(e))?)
        .bind(serde_json::to_value(&tenant.third_party).map_err(|e| anyhow!(e))?)
        .bind(serde_json::to_value(&tenant.passwordless).map_err(|e| anyhow!(e))?)
        .bind(serde_json::to_value(&tenant.core_config).map_err(|e| anyhow!(e))?)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTenant(tenant.identifier.clone()));
        }
        Ok(())
    }

    async fn delete_tenant(&self, identifier: &TenantIdentifier) -> StoreResult<()> {
        let result = sqlx::query(
            r#"DELETE FROM tenant_configs
               WHERE connection_uri_domain = $1 AND app_id = $2 AND tenant_id = $3"#,
        )
        .bind(&identifier.connection_uri_domain)
        .bind(&identifier.app_id)
        .bind(&identifier.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTenant(identifier.clone()));
        }
        Ok(())
    }

    async fn mark_app_id_as_deleted(&self, app_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE tenant_configs SET app_id_marked_as_deleted = TRUE WHERE app_id = $1")
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn mark_connection_uri_domain_as_deleted(&self, domain: &str) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE tenant_configs
               SET connection_uri_domain_marked_as_deleted = TRUE
               WHERE connection_uri_domain = $1"#,
        )
        .bind(domain)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

pub struct PostgresUserPool {
    pool_id: String,
    pool: PgPool,
}

#[async_trait]
impl UserPoolStore for PostgresUserPool {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    async fn add_tenant_id_in_user_pool(&self, identifier: &TenantIdentifier) -> StoreResult<()> {
        if !identifier.is_default_tenant() {
            let parent = identifier.app_default();
            let parent_known = sqlx::query_scalar::<_, i64>(
                r#"SELECT COUNT(*) FROM tenant_membership
                   WHERE connection_uri_domain = $1 AND app_id = $2 AND tenant_id = $3"#,
            )
            .bind(&parent.connection_uri_domain)
            .bind(&parent.app_id)
            .bind(&parent.tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?
                > 0;
            if !parent_known {
                return Err(StoreError::TenantOrAppNotFound(identifier.clone()));
            }
        }
        sqlx::query(
            r#"INSERT INTO tenant_membership (connection_uri_domain, app_id, tenant_id)
               VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"#,
        )
        .bind(&identifier.connection_uri_domain)
        .bind(&identifier.app_id)
        .bind(&identifier.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn delete_tenant_id_in_user_pool(
        &self,
        identifier: &TenantIdentifier,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"DELETE FROM tenant_membership
               WHERE connection_uri_domain = $1 AND app_id = $2 AND tenant_id = $3"#,
        )
        .bind(&identifier.connection_uri_domain)
        .bind(&identifier.app_id)
        .bind(&identifier.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTenant(identifier.clone()));
        }
        Ok(())
    }

    async fn add_user_id_to_tenant(
        &self,
        identifier: &TenantIdentifier,
        user_id: &str,
    ) -> StoreResult<()> {
        let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pool_users WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?
            > 0;
        if !known {
            return Err(StoreError::UnknownUserId(user_id.to_string()));
        }
        sqlx::query(
            r#"INSERT INTO user_tenants (user_id, connection_uri_domain, app_id, tenant_id)
               VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING"#,
        )
        .bind(user_id)
        .bind(&identifier.connection_uri_domain)
        .bind(&identifier.app_id)
        .bind(&identifier.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn add_role_to_tenant(
        &self,
        identifier: &TenantIdentifier,
        role: &str,
    ) -> StoreResult<()> {
        let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pool_roles WHERE role = $1")
            .bind(role)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?
            > 0;
        if !known {
            return Err(StoreError::UnknownRole(role.to_string()));
        }
        sqlx::query(
            r#"INSERT INTO role_tenants (role, connection_uri_domain, app_id, tenant_id)
               VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING"#,
        )
        .bind(role)
        .bind(&identifier.connection_uri_domain)
        .bind(&identifier.app_id)
        .bind(&identifier.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_permissions_for_role(&self, role: &str) -> StoreResult<Vec<String>> {
        let permissions =
            sqlx::query_scalar::<_, Value>("SELECT permissions FROM pool_roles WHERE role = $1")
                .bind(role)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_err)?
                .ok_or_else(|| StoreError::UnknownRole(role.to_string()))?;
        serde_json::from_value::<Vec<String>>(permissions)
            .map_err(|e| StoreError::Query(anyhow!("permissions column: {e}")))
    }

    async fn create_user(&self, user_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO pool_users (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn create_role(&self, role: &str, permissions: &[String]) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO pool_roles (role, permissions) VALUES ($1, $2)
               ON CONFLICT (role) DO UPDATE SET permissions = EXCLUDED.permissions"#,
        )
        .bind(role)
        .bind(serde_json::to_value(permissions).map_err(|e| anyhow!(e))?)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}
