pub mod associations;
pub mod prefixes;
pub mod stats;
pub mod vpcs;
pub mod vrfs;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::{IpamError, NotFoundError};

/// Error response - {"error": "message"}
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// API error type
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{} not found", resource),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Typed downcast per error taxonomy (no fragile string matching)
        if let Some(nf) = err.downcast_ref::<NotFoundError>() {
            return Self {
                status: StatusCode::NOT_FOUND,
                message: nf.to_string(),
            };
        }
        if let Some(domain) = err.downcast_ref::<IpamError>() {
            let status = match domain {
                IpamError::InvalidCidr(_)
                | IpamError::InvalidMaskLength(_)
                | IpamError::ParentMismatch(_)
                | IpamError::FamilyMismatch(_) => StatusCode::BAD_REQUEST,
                IpamError::DuplicateCidr(_)
                | IpamError::SiblingOverlap(_)
                | IpamError::AlreadyExists(_)
                | IpamError::ParameterMismatch(_)
                | IpamError::AssociationPolicy(_)
                | IpamError::NoSpaceAvailable(_) => StatusCode::CONFLICT,
                IpamError::VpcSourcedImmutable(_)
                | IpamError::HasChildren(_)
                | IpamError::ChildrenNotAllowed(_)
                | IpamError::PrefixInUse(_)
                | IpamError::VrfInUse(_)
                | IpamError::VpcInUse(_) => StatusCode::BAD_REQUEST,
                IpamError::ProtectedVrf(_) => StatusCode::FORBIDDEN,
            };
            return Self {
                status,
                message: domain.to_string(),
            };
        }
        Self::internal(err.to_string())
    }
}

/// Request id from the X-Request-ID header, when present
pub fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Turn a stored (status, body) pair back into an axum response
pub fn respond(status: u16, body: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        Json(body),
    )
}

/// Healthcheck endpoint — returns 200 OK with status
pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cloud-ipam",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
