//! Recurring background jobs.
//!
//! # Purpose
//! Hosts the scheduler the reconciler hands the current tenant list to. Each
//! registered task runs on its own interval against the tenant set that was
//! most recently installed via `set_tenants_info`.
use crate::model::TenantIdentifier;
use crate::signing_keys::SigningKeyRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[async_trait]
pub trait CronTask: Send + Sync {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    async fn run(&self, tenants: &[TenantIdentifier]) -> anyhow::Result<()>;
}

pub struct Cronjobs {
    tenants: RwLock<Vec<TenantIdentifier>>,
    tasks: RwLock<Vec<Arc<dyn CronTask>>>,
}

impl Cronjobs {
    /// Starts with only the base tenant; the first reconcile replaces the set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tenants: RwLock::new(vec![TenantIdentifier::base()]),
            tasks: RwLock::new(Vec::new()),
        })
    }

    /// Total replacement of the scheduler's known tenant set. Idempotent.
    pub async fn set_tenants_info(&self, tenants: Vec<TenantIdentifier>) {
        *self.tenants.write().await = tenants;
    }

    pub async fn tenants_info(&self) -> Vec<TenantIdentifier> {
        self.tenants.read().await.clone()
    }

    pub async fn task_names(&self) -> Vec<&'static str> {
        self.tasks.read().await.iter().map(|t| t.name()).collect()
    }

    /// Registers a task and spawns its interval loop. A failing run is logged
    /// and retried on the next tick.
    pub async fn register(self: &Arc<Self>, task: Arc<dyn CronTask>) {
        self.tasks.write().await.push(task.clone());
        let jobs = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task.interval());
            // The first tick fires immediately; skip it so registration does
            // not race the initial reconcile.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let tenants = jobs.tenants.read().await.clone();
                if let Err(err) = task.run(&tenants).await {
                    tracing::warn!(task = task.name(), error = ?err, "cron task failed");
                    metrics::counter!("gatehouse_cron_failures_total", "task" => task.name())
                        .increment(1);
                }
            }
        });
    }
}

/// Sweeps every tenant's key managers and rotates the expired ones.
pub struct SigningKeyRotationTask {
    registry: Arc<SigningKeyRegistry>,
}

impl SigningKeyRotationTask {
    pub fn new(registry: Arc<SigningKeyRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CronTask for SigningKeyRotationTask {
    fn name(&self) -> &'static str {
        "signing-key-rotation"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    async fn run(&self, _tenants: &[TenantIdentifier]) -> anyhow::Result<()> {
        let rotated = self.registry.rotate_expired().await?;
        if rotated > 0 {
            tracing::info!(rotated, "rotated expired signing keys");
        }
        Ok(())
    }
}
