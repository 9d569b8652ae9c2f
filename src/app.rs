//! HTTP application wiring.
//!
//! # Purpose
//! Builds the axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and
//! testable.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::multitenancy::Multitenancy;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Multitenancy>,
    pub api_version: String,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/recipe/role/permissions",
            axum::routing::get(api::userroles::get_permissions_for_role),
        )
        .route(
            "/recipe/multitenancy/tenant",
            axum::routing::put(api::multitenancy::create_or_update_tenant)
                .get(api::multitenancy::get_tenant),
        )
        .route(
            "/recipe/multitenancy/tenant/remove",
            axum::routing::post(api::multitenancy::remove_tenant),
        )
        .route(
            "/recipe/multitenancy/tenant/list",
            axum::routing::get(api::multitenancy::list_tenants),
        )
        .route(
            "/recipe/multitenancy/app/remove",
            axum::routing::post(api::multitenancy::remove_app),
        )
        .route(
            "/recipe/multitenancy/connectionuridomain/remove",
            axum::routing::post(api::multitenancy::remove_connection_uri_domain),
        )
        .route(
            "/recipe/multitenancy/tenant/user",
            axum::routing::post(api::multitenancy::associate_user),
        )
        .route(
            "/recipe/multitenancy/tenant/role",
            axum::routing::post(api::multitenancy::associate_role),
        )
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
