//! Multitenancy admin HTTP handlers.
//!
//! # Purpose
//! The HTTP face of the tenant admin orchestration: create-or-update, delete
//! tenant/app/connection-URI-domain, user/role association, and tenant
//! queries. Domain outcomes are encoded as `status` strings; precondition
//! violations are 400s; backend failures are 500s.
use crate::api::error::{ApiError, api_bad_request, api_internal};
use crate::api::types::{
    AssociateRoleRequest, AssociateUserRequest, CreateOrUpdateTenantRequest,
    CreateOrUpdateTenantResponse, RemoveTenantResponse, StatusResponse, TenantIdentifierRequest,
    TenantInfoResponse, TenantListResponse,
};
use crate::app::AppState;
use crate::model::TenantIdentifier;
use crate::multitenancy::AdminError;
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

/// Maps an admin failure onto the wire: domain errors become `status`
/// strings, precondition violations 400, everything else 500.
fn admin_error_response(err: AdminError) -> Result<Response, ApiError> {
    let status = match &err {
        AdminError::Store(StoreError::UnknownTenant(_)) => Some("UNKNOWN_TENANT_ERROR"),
        AdminError::Store(StoreError::TenantOrAppNotFound(_)) => {
            Some("TENANT_OR_APP_NOT_FOUND_ERROR")
        }
        AdminError::Store(StoreError::UnknownUserId(_)) => Some("UNKNOWN_USER_ID_ERROR"),
        AdminError::Store(StoreError::UnknownRole(_)) => Some("UNKNOWN_ROLE_ERROR"),
        AdminError::CannotDeleteDefaultTenant
        | AdminError::CannotDeleteDefaultApp
        | AdminError::CannotDeleteDefaultConnectionUriDomain
        | AdminError::NonDefaultTenant(_)
        | AdminError::NonDefaultApp(_)
        | AdminError::NonDefaultConnectionUriDomain(_)
        | AdminError::SameTenantMove => return Err(api_bad_request(&err.to_string())),
        _ => None,
    };
    match status {
        Some(code) => Ok(Json(StatusResponse::new(code)).into_response()),
        None => Err(api_internal("tenant admin operation failed", &err)),
    }
}

fn identifier_from_query(params: &HashMap<String, String>) -> TenantIdentifier {
    TenantIdentifier::new(
        params.get("connectionUriDomain").map(String::as_str),
        params.get("appId").map(String::as_str),
        params.get("tenantId").map(String::as_str),
    )
}

#[utoipa::path(
    put,
    path = "/recipe/multitenancy/tenant",
    tag = "multitenancy",
    request_body = CreateOrUpdateTenantRequest,
    responses(
        (status = 200, description = "Tenant created or updated", body = CreateOrUpdateTenantResponse),
        (status = 400, description = "Malformed tenant payload", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_or_update_tenant(
    State(state): State<AppState>,
    Json(body): Json<CreateOrUpdateTenantRequest>,
) -> Result<Response, ApiError> {
    let tenant = body.into_tenant_config().map_err(|e| api_bad_request(&e))?;
    match state.fleet.add_or_update(tenant).await {
        Ok(created_new) => Ok(Json(CreateOrUpdateTenantResponse {
            status: "OK".to_string(),
            created_new,
        })
        .into_response()),
        Err(err) => admin_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/recipe/multitenancy/tenant/remove",
    tag = "multitenancy",
    request_body = TenantIdentifierRequest,
    responses(
        (status = 200, description = "Tenant removed if it existed", body = RemoveTenantResponse),
        (status = 400, description = "Default tenant is not deletable", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn remove_tenant(
    State(state): State<AppState>,
    Json(body): Json<TenantIdentifierRequest>,
) -> Result<Response, ApiError> {
    let identifier = body.into_identifier();
    match state.fleet.delete_tenant(&identifier).await {
        Ok(()) => Ok(Json(RemoveTenantResponse {
            status: "OK".to_string(),
            did_exist: true,
        })
        .into_response()),
        Err(AdminError::Store(StoreError::UnknownTenant(_))) => Ok(Json(RemoveTenantResponse {
            status: "OK".to_string(),
            did_exist: false,
        })
        .into_response()),
        Err(err) => admin_error_response(err),
    }
}

#[utoipa::path(
    get,
    path = "/recipe/multitenancy/tenant",
    tag = "multitenancy",
    params(
        ("connectionUriDomain" = Option<String>, Query, description = "Connection URI domain"),
        ("appId" = Option<String>, Query, description = "App identifier"),
        ("tenantId" = Option<String>, Query, description = "Tenant identifier")
    ),
    responses(
        (status = 200, description = "Tenant configuration", body = TenantInfoResponse)
    )
)]
pub(crate) async fn get_tenant(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let identifier = identifier_from_query(&params);
    match state.fleet.get_tenant_info(&identifier).await {
        Some(tenant) => Ok(Json(TenantInfoResponse {
            status: "OK".to_string(),
            tenant,
        })
        .into_response()),
        None => Ok(Json(StatusResponse::new("UNKNOWN_TENANT_ERROR")).into_response()),
    }
}

#[utoipa::path(
    get,
    path = "/recipe/multitenancy/tenant/list",
    tag = "multitenancy",
    params(
        ("connectionUriDomain" = Option<String>, Query, description = "Connection URI domain"),
        ("appId" = Option<String>, Query, description = "App identifier")
    ),
    responses(
        (status = 200, description = "Visible tenants of the app", body = TenantListResponse),
        (status = 400, description = "Identifier must target the app's default tenant", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_tenants(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let identifier = identifier_from_query(&params);
    match state.fleet.get_all_tenants_for_app(&identifier).await {
        Ok(tenants) => Ok(Json(TenantListResponse {
            status: "OK".to_string(),
            tenants,
        })
        .into_response()),
        Err(err) => admin_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/recipe/multitenancy/app/remove",
    tag = "multitenancy",
    request_body = TenantIdentifierRequest,
    responses(
        (status = 200, description = "App soft-deleted", body = StatusResponse),
        (status = 400, description = "Must target the app's default tenant", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn remove_app(
    State(state): State<AppState>,
    Json(body): Json<TenantIdentifierRequest>,
) -> Result<Response, ApiError> {
    let identifier = body.into_identifier();
    match state.fleet.delete_app(&identifier).await {
        Ok(()) => Ok(Json(StatusResponse::new("OK")).into_response()),
        Err(err) => admin_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/recipe/multitenancy/connectionuridomain/remove",
    tag = "multitenancy",
    request_body = TenantIdentifierRequest,
    responses(
        (status = 200, description = "Connection URI domain soft-deleted", body = StatusResponse),
        (status = 400, description = "Must target the domain's default app and tenant", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn remove_connection_uri_domain(
    State(state): State<AppState>,
    Json(body): Json<TenantIdentifierRequest>,
) -> Result<Response, ApiError> {
    let identifier = body.into_identifier();
    match state.fleet.delete_connection_uri_domain(&identifier).await {
        Ok(()) => Ok(Json(StatusResponse::new("OK")).into_response()),
        Err(err) => admin_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/recipe/multitenancy/tenant/user",
    tag = "multitenancy",
    request_body = AssociateUserRequest,
    responses(
        (status = 200, description = "User associated with the target tenant", body = StatusResponse),
        (status = 400, description = "Source and target tenant are the same", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn associate_user(
    State(state): State<AppState>,
    Json(body): Json<AssociateUserRequest>,
) -> Result<Response, ApiError> {
    let source = TenantIdentifier::new(
        body.connection_uri_domain.as_deref(),
        body.app_id.as_deref(),
        body.tenant_id.as_deref(),
    );
    match state
        .fleet
        .add_user_id_to_tenant(&source, &body.user_id, &body.new_tenant_id)
        .await
    {
        Ok(()) => Ok(Json(StatusResponse::new("OK")).into_response()),
        Err(err) => admin_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/recipe/multitenancy/tenant/role",
    tag = "multitenancy",
    request_body = AssociateRoleRequest,
    responses(
        (status = 200, description = "Role associated with the target tenant", body = StatusResponse),
        (status = 400, description = "Source and target tenant are the same", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn associate_role(
    State(state): State<AppState>,
    Json(body): Json<AssociateRoleRequest>,
) -> Result<Response, ApiError> {
    let source = TenantIdentifier::new(
        body.connection_uri_domain.as_deref(),
        body.app_id.as_deref(),
        body.tenant_id.as_deref(),
    );
    match state
        .fleet
        .add_role_to_tenant(&source, &body.role, &body.new_tenant_id)
        .await
    {
        Ok(()) => Ok(Json(StatusResponse::new("OK")).into_response()),
        Err(err) => admin_error_response(err),
    }
}
