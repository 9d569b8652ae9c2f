//! User-roles recipe handlers.
//!
//! # Purpose
//! Consumer of the control plane: resolves the base tenant's storage and
//! answers role queries from it.
use crate::api::error::{ApiError, api_bad_request, api_internal, api_internal_message};
use crate::api::types::{PermissionsResponse, StatusResponse};
use crate::app::AppState;
use crate::model::TenantIdentifier;
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

#[utoipa::path(
    get,
    path = "/recipe/role/permissions",
    tag = "userroles",
    params(
        ("role" = String, Query, description = "Role to look up")
    ),
    responses(
        (status = 200, description = "Permissions of the role", body = PermissionsResponse),
        (status = 400, description = "Missing or empty role", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_permissions_for_role(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let role = params
        .get("role")
        .map(|value| value.trim().to_string())
        .unwrap_or_default();
    if role.is_empty() {
        return Err(api_bad_request("Field name 'role' cannot be an empty String"));
    }

    // Routed through the base tenant unless a surrounding dispatcher says
    // otherwise.
    let storage = state
        .fleet
        .storage(&TenantIdentifier::base())
        .await
        .ok_or_else(|| api_internal_message("base tenant storage is not loaded"))?;
    match storage.get_permissions_for_role(&role).await {
        Ok(permissions) => Ok(Json(PermissionsResponse {
            status: "OK".to_string(),
            permissions,
        })
        .into_response()),
        Err(StoreError::UnknownRole(_)) => {
            Ok(Json(StatusResponse::new("UNKNOWN_ROLE_ERROR")).into_response())
        }
        Err(err) => Err(api_internal("failed to load role permissions", &err)),
    }
}
