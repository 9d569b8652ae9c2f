//! OpenAPI document assembly.
use crate::api::types::{
    AssociateRoleRequest, AssociateUserRequest, CreateOrUpdateTenantRequest,
    CreateOrUpdateTenantResponse, ErrorResponse, HealthStatus, PermissionsResponse,
    RemoveTenantResponse, StatusResponse, TenantIdentifierRequest, TenantInfoResponse,
    TenantListResponse,
};
use crate::model::{
    EmailPasswordConfig, PasswordlessConfig, TenantConfig, TenantIdentifier, ThirdPartyConfig,
    ThirdPartyProvider,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gatehouse",
        version = "v1",
        description = "Self-hosted multi-tenant authentication core"
    ),
    paths(
        crate::api::system::system_health,
        crate::api::userroles::get_permissions_for_role,
        crate::api::multitenancy::create_or_update_tenant,
        crate::api::multitenancy::get_tenant,
        crate::api::multitenancy::remove_tenant,
        crate::api::multitenancy::list_tenants,
        crate::api::multitenancy::remove_app,
        crate::api::multitenancy::remove_connection_uri_domain,
        crate::api::multitenancy::associate_user,
        crate::api::multitenancy::associate_role
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        StatusResponse,
        PermissionsResponse,
        TenantIdentifier,
        TenantConfig,
        EmailPasswordConfig,
        ThirdPartyConfig,
        ThirdPartyProvider,
        PasswordlessConfig,
        TenantIdentifierRequest,
        CreateOrUpdateTenantRequest,
        CreateOrUpdateTenantResponse,
        RemoveTenantResponse,
        TenantInfoResponse,
        TenantListResponse,
        AssociateUserRequest,
        AssociateRoleRequest
    )),
    tags(
        (name = "system", description = "System endpoints"),
        (name = "userroles", description = "User roles recipe"),
        (name = "multitenancy", description = "Tenant administration")
    )
)]
pub struct ApiDoc;
