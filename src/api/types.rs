//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the wire payload shapes of the recipe surface and the OpenAPI
//! schema registrations. Recipe responses follow the core's convention of a
//! `status` discriminator string in a 200 body; identifiers arrive camelCase
//! on the wire.
use crate::model::{
    EmailPasswordConfig, PasswordlessConfig, TenantConfig, TenantIdentifier, ThirdPartyConfig,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
}

/// Bare `status` discriminator body used by every recipe error outcome.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionsResponse {
    pub status: String,
    pub permissions: Vec<String>,
}

/// Identifier components as they appear in request bodies and query strings.
/// Absent or empty components mean the defaults.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TenantIdentifierRequest {
    pub connection_uri_domain: Option<String>,
    pub app_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl TenantIdentifierRequest {
    pub fn into_identifier(self) -> TenantIdentifier {
        TenantIdentifier::new(
            self.connection_uri_domain.as_deref(),
            self.app_id.as_deref(),
            self.tenant_id.as_deref(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrUpdateTenantRequest {
    pub connection_uri_domain: Option<String>,
    pub app_id: Option<String>,
    pub tenant_id: Option<String>,
    pub email_password: Option<EmailPasswordConfig>,
    pub third_party: Option<ThirdPartyConfig>,
    pub passwordless: Option<PasswordlessConfig>,
    #[schema(value_type = Object)]
    pub core_config: Option<serde_json::Value>,
}

impl CreateOrUpdateTenantRequest {
    /// Builds the catalog row, starting from the defaults and overriding the
    /// provided fields. Fails when `coreConfig` is not a JSON object.
    pub fn into_tenant_config(self) -> Result<TenantConfig, String> {
        let identifier = TenantIdentifier::new(
            self.connection_uri_domain.as_deref(),
            self.app_id.as_deref(),
            self.tenant_id.as_deref(),
        );
        let mut tenant = TenantConfig::with_defaults(identifier);
        if let Some(email_password) = self.email_password {
            tenant.email_password = email_password;
        }
        if let Some(third_party) = self.third_party {
            tenant.third_party = third_party;
        }
        if let Some(passwordless) = self.passwordless {
            tenant.passwordless = passwordless;
        }
        if let Some(core_config) = self.core_config {
            tenant.core_config = crate::model::CoreConfig::from_object(core_config)
                .ok_or_else(|| "coreConfig must be a JSON object".to_string())?;
        }
        Ok(tenant)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrUpdateTenantResponse {
    pub status: String,
    pub created_new: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTenantResponse {
    pub status: String,
    pub did_exist: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantInfoResponse {
    pub status: String,
    pub tenant: TenantConfig,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantListResponse {
    pub status: String,
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssociateUserRequest {
    pub connection_uri_domain: Option<String>,
    pub app_id: Option<String>,
    pub tenant_id: Option<String>,
    pub user_id: String,
    pub new_tenant_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssociateRoleRequest {
    pub connection_uri_domain: Option<String>,
    pub app_id: Option<String>,
    pub tenant_id: Option<String>,
    pub role: String,
    pub new_tenant_id: String,
}
