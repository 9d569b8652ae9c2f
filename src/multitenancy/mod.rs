//! The multitenancy control plane.
//!
//! # Purpose
//! Reconciles the persisted tenant catalog with the in-memory fleet of
//! per-tenant runtime resources: a merged config snapshot, a user-pool
//! storage handle, and the three signing-key managers. Recipe handlers and
//! the admin surface resolve tenants through this module.
//!
//! # Notes
//! Reads clone an `Arc` snapshot and never block reloads. Reloads serialize
//! on a dedicated mutex; the catalog read happens before the lock to keep the
//! critical section short.
use crate::config::FeatureFlags;
use crate::cron::Cronjobs;
use crate::model::{CoreConfig, TenantConfig, TenantIdentifier};
use crate::signing_keys::{SigningKeyRegistry, TenantSigningKeys};
use crate::store::{StorageDriver, StoreError, UserPoolStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

mod admin;

pub use admin::AdminError;

/// Errors surfaced by the per-tenant resource loaders. `refresh_if_required`
/// logs and swallows them; explicit admin writes surface them to the caller.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid tenant configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported jwt signing algorithm: {0}")]
    UnsupportedJwtSigningAlgorithm(String),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct FleetState {
    /// Last catalog snapshot observed as visible, in catalog order.
    tenants: Arc<Vec<TenantConfig>>,
    /// Merged per-tenant config snapshots.
    configs: HashMap<TenantIdentifier, Arc<CoreConfig>>,
    /// One storage handle per tenant; tenants in the same user pool share it.
    storages: HashMap<TenantIdentifier, Arc<dyn UserPoolStore>>,
}

/// Process-wide fleet of per-tenant runtime resources.
pub struct Multitenancy {
    driver: Arc<dyn StorageDriver>,
    cron: Arc<Cronjobs>,
    keys: Arc<SigningKeyRegistry>,
    features: FeatureFlags,
    base_config: CoreConfig,
    state: RwLock<FleetState>,
    reload_lock: Mutex<()>,
}

impl Multitenancy {
    /// Builds an empty fleet. Callers run `refresh_if_required` once before
    /// serving so the base tenant is resolvable.
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        cron: Arc<Cronjobs>,
        features: FeatureFlags,
        base_config: CoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            cron,
            keys: Arc::new(SigningKeyRegistry::new()),
            features,
            base_config,
            state: RwLock::new(FleetState {
                tenants: Arc::new(Vec::new()),
                configs: HashMap::new(),
                storages: HashMap::new(),
            }),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn driver(&self) -> Arc<dyn StorageDriver> {
        self.driver.clone()
    }

    pub fn key_registry(&self) -> Arc<SigningKeyRegistry> {
        self.keys.clone()
    }

    /// Re-align the fleet with the catalog if it drifted. Loader failures are
    /// logged and swallowed; the next invocation retries.
    pub async fn refresh_if_required(&self) {
        if let Err(err) = self.refresh_inner().await {
            metrics::counter!("gatehouse_tenant_refresh_failures_total").increment(1);
            tracing::error!(error = ?err, "tenant refresh failed");
        }
    }

    async fn refresh_inner(&self) -> Result<(), FleetError> {
        let fresh: Vec<TenantConfig> = self
            .driver
            .catalog()
            .list_all_tenants()
            .await?
            .into_iter()
            .filter(TenantConfig::is_visible)
            .collect();

        let _reload = self.reload_lock.lock().await;

        // Drift is the symmetric difference of the identifier sets: an
        // equal-size swap of one tenant for another must still reload.
        let changed = {
            let state = self.state.read().await;
            let current: HashSet<&TenantIdentifier> =
                state.tenants.iter().map(|t| &t.identifier).collect();
            let incoming: HashSet<&TenantIdentifier> =
                fresh.iter().map(|t| &t.identifier).collect();
            current != incoming
        };

        {
            let mut state = self.state.write().await;
            state.tenants = Arc::new(fresh.clone());
        }
        if !changed {
            return Ok(());
        }

        // With multitenancy disabled only the base tenant gets resources;
        // the snapshot above still reflects the catalog.
        let loaded: Vec<TenantConfig> = if self.features.multi_tenancy {
            fresh
        } else {
            fresh
                .into_iter()
                .filter(|t| t.identifier == TenantIdentifier::base())
                .collect()
        };

        let configs = self.load_config(&loaded).await?;
        self.load_storage(&loaded, &configs).await?;
        self.keys.load_for_all_tenants(&configs).await?;
        self.cron
            .set_tenants_info(loaded.iter().map(|t| t.identifier.clone()).collect())
            .await;

        metrics::gauge!("gatehouse_visible_tenants").set(loaded.len() as f64);
        metrics::counter!("gatehouse_tenant_refresh_total").increment(1);
        tracing::info!(tenants = loaded.len(), "tenant fleet reloaded");
        Ok(())
    }

    /// Materialize merged config snapshots, reusing the snapshot of any
    /// tenant whose merged config is unchanged.
    async fn load_config(
        &self,
        loaded: &[TenantConfig],
    ) -> Result<HashMap<TenantIdentifier, Arc<CoreConfig>>, FleetError> {
        // Tenants of one app must agree on the user pool; their storage
        // handles are required to resolve to the same physical database.
        let mut pool_by_app: HashMap<(&str, &str), String> = HashMap::new();
        for tenant in loaded {
            let merged = tenant.core_config.merged_over(&self.base_config);
            let app = (
                tenant.identifier.connection_uri_domain.as_str(),
                tenant.identifier.app_id.as_str(),
            );
            let pool = merged.user_pool_id();
            match pool_by_app.get(&app) {
                Some(existing) if *existing != pool => {
                    return Err(FleetError::InvalidConfig(format!(
                        "tenants of app {} select different user pools ({existing} vs {pool})",
                        tenant.identifier.app_default(),
                    )));
                }
                Some(_) => {}
                None => {
                    pool_by_app.insert(app, pool);
                }
            }
        }

        let mut state = self.state.write().await;
        let mut configs = HashMap::new();
        for tenant in loaded {
            let merged = tenant.core_config.merged_over(&self.base_config);
            let snapshot = match state.configs.get(&tenant.identifier) {
                Some(existing) if **existing == merged => existing.clone(),
                _ => Arc::new(merged),
            };
            configs.insert(tenant.identifier.clone(), snapshot);
        }
        state.configs = configs.clone();
        Ok(configs)
    }

    /// Open one storage handle per distinct user pool and hand every tenant
    /// its pool's handle. Handles of pools no visible tenant references are
    /// dropped.
    async fn load_storage(
        &self,
        loaded: &[TenantConfig],
        configs: &HashMap<TenantIdentifier, Arc<CoreConfig>>,
    ) -> Result<(), FleetError> {
        let mut storages: HashMap<TenantIdentifier, Arc<dyn UserPoolStore>> = HashMap::new();
        for tenant in loaded {
            let mut routed = tenant.clone();
            routed.core_config = (*configs[&tenant.identifier]).clone();
            let pool = self.driver.user_pool(&routed).await?;
            storages.insert(tenant.identifier.clone(), pool);
        }
        let in_use: HashSet<String> = storages
            .values()
            .map(|p| p.pool_id().to_string())
            .collect();
        self.driver.retain_user_pools(&in_use).await;
        let mut state = self.state.write().await;
        state.storages = storages;
        metrics::gauge!("gatehouse_open_user_pools").set(in_use.len() as f64);
        Ok(())
    }

    /// The last visible snapshot, in catalog order.
    pub async fn tenant_snapshot(&self) -> Arc<Vec<TenantConfig>> {
        self.state.read().await.tenants.clone()
    }

    /// Linear scan of the current snapshot; `None` if absent.
    pub async fn resolve(&self, identifier: &TenantIdentifier) -> Option<TenantConfig> {
        let snapshot = self.tenant_snapshot().await;
        snapshot
            .iter()
            .find(|t| &t.identifier == identifier)
            .cloned()
    }

    pub async fn visible_identifiers(&self) -> HashSet<TenantIdentifier> {
        let snapshot = self.tenant_snapshot().await;
        snapshot.iter().map(|t| t.identifier.clone()).collect()
    }

    pub async fn config_snapshot(&self, identifier: &TenantIdentifier) -> Option<Arc<CoreConfig>> {
        self.state.read().await.configs.get(identifier).cloned()
    }

    /// The tenant's user-pool handle, falling back to the base tenant's.
    pub async fn storage(&self, identifier: &TenantIdentifier) -> Option<Arc<dyn UserPoolStore>> {
        let state = self.state.read().await;
        state
            .storages
            .get(identifier)
            .or_else(|| state.storages.get(&TenantIdentifier::base()))
            .cloned()
    }

    /// The tenant's three signing-key managers, falling back to the base
    /// tenant's managers for identifiers the fleet does not know.
    pub async fn signing_keys(&self, identifier: &TenantIdentifier) -> Option<TenantSigningKeys> {
        match self.keys.managers(identifier).await {
            Some(keys) => Some(keys),
            None => self.keys.managers(&TenantIdentifier::base()).await,
        }
    }
}
