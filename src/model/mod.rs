//! Tenant catalog data model.
//!
//! # Purpose
//! Re-exports the tenant identifier, per-tenant recipe configuration, and the
//! core-config map shared by the store and multitenancy layers.
mod tenant;

pub use tenant::{
    CoreConfig, EmailPasswordConfig, PasswordlessConfig, TenantConfig, TenantIdentifier,
    ThirdPartyConfig, ThirdPartyProvider, DEFAULT_APP_ID, DEFAULT_CONNECTION_URI_DOMAIN,
    DEFAULT_TENANT_ID,
};
