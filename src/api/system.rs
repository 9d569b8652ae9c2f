//! System endpoints.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::HealthStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

// Liveness endpoint backed by a catalog probe.
#[utoipa::path(
    get,
    path = "/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Core health", body = HealthStatus),
        (status = 500, description = "Catalog unavailable", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.fleet.driver().catalog().health_check().await {
        return Err(api_internal("catalog unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "OK".to_string(),
    }))
}
