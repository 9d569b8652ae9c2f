//! Tenant identifier and catalog row model.
//!
//! # Purpose
//! Defines the three-level tenant identifier, the persisted tenant
//! configuration, and the core-config key/value map with its typed accessors.
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Sentinel for the base connection-URI domain of the process.
pub const DEFAULT_CONNECTION_URI_DOMAIN: &str = "";
/// Sentinel for the app every deployment starts with.
pub const DEFAULT_APP_ID: &str = "public";
/// Sentinel for the tenant every app starts with.
pub const DEFAULT_TENANT_ID: &str = "public";

/// Identity of a tenant: `(connection_uri_domain, app_id, tenant_id)`.
///
/// Identifiers are immutable and compared by value over all three components.
/// A connection-URI domain owns apps; an app owns tenants. Construction
/// normalizes absent or empty components to the well-known defaults, so two
/// identifiers built from `None` and `Some("")` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct TenantIdentifier {
    pub connection_uri_domain: String,
    pub app_id: String,
    pub tenant_id: String,
}

impl TenantIdentifier {
    pub fn new(
        connection_uri_domain: Option<&str>,
        app_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Self {
        Self {
            connection_uri_domain: normalize(connection_uri_domain, DEFAULT_CONNECTION_URI_DOMAIN),
            app_id: normalize(app_id, DEFAULT_APP_ID),
            tenant_id: normalize(tenant_id, DEFAULT_TENANT_ID),
        }
    }

    /// The `(default, default, default)` identifier every process serves.
    pub fn base() -> Self {
        Self::new(None, None, None)
    }

    pub fn is_default_tenant(&self) -> bool {
        self.tenant_id == DEFAULT_TENANT_ID
    }

    pub fn is_default_app(&self) -> bool {
        self.app_id == DEFAULT_APP_ID
    }

    pub fn is_default_connection_uri_domain(&self) -> bool {
        self.connection_uri_domain == DEFAULT_CONNECTION_URI_DOMAIN
    }

    /// Sibling identifier with only the tenant component replaced.
    pub fn with_tenant_id(&self, tenant_id: &str) -> Self {
        Self::new(
            Some(&self.connection_uri_domain),
            Some(&self.app_id),
            Some(tenant_id),
        )
    }

    /// The default tenant of the app this identifier belongs to.
    pub fn app_default(&self) -> Self {
        self.with_tenant_id(DEFAULT_TENANT_ID)
    }
}

impl Default for TenantIdentifier {
    fn default() -> Self {
        Self::base()
    }
}

impl fmt::Display for TenantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let domain = if self.connection_uri_domain.is_empty() {
            "<base>"
        } else {
            &self.connection_uri_domain
        };
        write!(f, "{domain}/{}/{}", self.app_id, self.tenant_id)
    }
}

fn normalize(value: Option<&str>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Enablement flag for the email/password recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EmailPasswordConfig {
    pub enabled: bool,
}

/// A third-party provider entry. The control plane treats the provider
/// configuration as opaque; recipe engines interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ThirdPartyProvider {
    pub third_party_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
}

/// Enablement flag plus provider list for the third-party recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ThirdPartyConfig {
    pub enabled: bool,
    #[serde(default)]
    pub providers: Vec<ThirdPartyProvider>,
}

/// Enablement flag for the passwordless recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PasswordlessConfig {
    pub enabled: bool,
}

/// Structured per-tenant configuration: a JSON object consumed by the config
/// loader. Carries signing-key intervals and the user-pool selector that
/// routes the tenant to a physical database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig(serde_json::Map<String, serde_json::Value>);

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_object(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self(map)),
            serde_json::Value::Null => Some(Self::default()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(serde_json::Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    /// Hours between access-token signing key rotations.
    pub fn access_token_signing_key_update_interval(&self) -> u64 {
        self.get_u64("access_token_signing_key_update_interval")
            .unwrap_or(168)
    }

    /// Hours between refresh-token key rotations.
    pub fn refresh_token_key_update_interval(&self) -> u64 {
        self.get_u64("refresh_token_key_update_interval")
            .unwrap_or(2400)
    }

    /// Hours between JWT signing key rotations.
    pub fn jwt_signing_key_update_interval(&self) -> u64 {
        self.get_u64("jwt_signing_key_update_interval")
            .unwrap_or(8760)
    }

    /// Signing algorithm for the JWT key class. Only RS256 is supported.
    pub fn jwt_signing_algorithm(&self) -> &str {
        self.get_str("jwt_signing_algorithm").unwrap_or("RS256")
    }

    /// Selector for the physical user-pool database hosting this tenant.
    /// Accepts either a string or an integer value.
    pub fn user_pool_id(&self) -> String {
        match self.0.get("user_pool_id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => "0".to_string(),
        }
    }

    /// Connection string for the selected pool (Postgres driver only).
    pub fn user_pool_connection_uri(&self) -> Option<&str> {
        self.get_str("user_pool_connection_uri")
    }

    /// Layer this config over `base`: keys present here win, everything else
    /// falls through to the base.
    pub fn merged_over(&self, base: &CoreConfig) -> CoreConfig {
        let mut merged = base.0.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        CoreConfig(merged)
    }
}

/// One row of the tenant catalog.
///
/// The two `*_marked_as_deleted` flags are the soft-delete markers for the
/// identifier's parents. A tenant is visible iff neither flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TenantConfig {
    pub identifier: TenantIdentifier,
    pub email_password: EmailPasswordConfig,
    pub third_party: ThirdPartyConfig,
    pub passwordless: PasswordlessConfig,
    #[schema(value_type = Object)]
    pub core_config: CoreConfig,
    #[serde(default)]
    pub app_id_marked_as_deleted: bool,
    #[serde(default)]
    pub connection_uri_domain_marked_as_deleted: bool,
}

impl TenantConfig {
    /// A row with all recipes enabled and an empty core config, the shape the
    /// base tenant is seeded with.
    pub fn with_defaults(identifier: TenantIdentifier) -> Self {
        Self {
            identifier,
            email_password: EmailPasswordConfig { enabled: true },
            third_party: ThirdPartyConfig {
                enabled: true,
                providers: Vec::new(),
            },
            passwordless: PasswordlessConfig { enabled: true },
            core_config: CoreConfig::new(),
            app_id_marked_as_deleted: false,
            connection_uri_domain_marked_as_deleted: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        !self.app_id_marked_as_deleted && !self.connection_uri_domain_marked_as_deleted
    }
}
