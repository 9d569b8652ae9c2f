// Gatehouse: self-hosted multi-tenant authentication core.
//
// The binary wires the storage driver, the tenant fleet, the cron scheduler,
// and the HTTP surface together:
// - storage: in-memory by default, Postgres when GATEHOUSE_POSTGRES_URL is
//   set (catalog migrations run before serving; user pools open on demand)
// - the fleet reconciles once at startup so the base tenant is resolvable,
//   then again after every admin write
// - cron receives the tenant list from each reconcile and runs the signing
//   key rotation sweep
use anyhow::Context;
use gatehouse::app::{AppState, build_router};
use gatehouse::config::{ProcessConfig, StorageBackend};
use gatehouse::cron::{Cronjobs, SigningKeyRotationTask};
use gatehouse::multitenancy::Multitenancy;
use gatehouse::observability;
use gatehouse::store::StorageDriver;
use gatehouse::store::memory::InMemoryDriver;
use gatehouse::store::postgres::PostgresDriver;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let metrics_handle = observability::init_observability();

    let config = ProcessConfig::from_env_or_yaml().context("gatehouse config")?;
    let driver: Arc<dyn StorageDriver> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryDriver::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(PostgresDriver::connect(pg).await?)
        }
    };
    tracing::info!(backend = driver.backend_name(), "storage driver ready");

    let cron = Cronjobs::new();
    let fleet = Multitenancy::new(
        driver,
        cron.clone(),
        config.features.clone(),
        config.base_core_config.clone(),
    );
    fleet.refresh_if_required().await;

    cron.register(Arc::new(SigningKeyRotationTask::new(fleet.key_registry())))
        .await;

    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = AppState {
        fleet,
        api_version: "v1".to_string(),
    };
    let app = build_router(state);

    let addr = config.bind_addr;
    tracing::info!(%addr, multi_tenancy = config.features.multi_tenancy, "gatehouse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
