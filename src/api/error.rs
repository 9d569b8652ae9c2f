//! API error types and helpers.
//!
//! # Purpose
//! Centralizes HTTP error response construction for consistent error shapes.
//! Domain errors of the recipe surface are not HTTP errors; handlers encode
//! them as `status` strings in a 200 body. These helpers cover the rest:
//! malformed input, rejected admin preconditions, and backend failures.
use crate::api::types::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn api_bad_request(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorResponse {
            code: "bad_request".to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

pub fn api_internal<E: std::fmt::Debug>(message: &str, err: &E) -> ApiError {
    tracing::error!(error = ?err, "gatehouse storage error");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            code: "internal".to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

pub fn api_internal_message(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            code: "internal".to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}
