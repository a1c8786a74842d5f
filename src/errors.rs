use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Gateway",
    "kind": "verification",
    "message": "Error processing payment. Please contact support.",
    "reference": "EGOV-1718012345678-k3j9x0a2b",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Gateway")]
    pub error: String,
    /// Machine-readable error kind
    #[schema(example = "verification")]
    pub kind: ErrorKind,
    /// Short human-readable message, suitable for a banner
    #[schema(example = "Error processing payment. Please contact support.")]
    pub message: String,
    /// Payment reference involved, kept for reconciliation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

/// Coarse classification of failures, one per user-facing behavior.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Missing field, unknown service, malformed value. User-correctable.
    Input,
    /// No or invalid identity.
    Authentication,
    /// Provider-side failure or cancelled checkout. Retry with a fresh reference.
    Payment,
    /// Client claimed success but the provider disagrees or could not be reached.
    Verification,
    /// Verified payment that could not be recorded.
    Persistence,
    /// Listing or profile fetch failed.
    Read,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment cancelled for reference {0}")]
    PaymentCancelled(String),

    #[error("Payment verification failed for reference {reference}: {reason}")]
    VerificationFailed { reference: String, reason: String },

    #[error("Verified payment {reference} could not be recorded: {reason}")]
    PersistenceFailed { reference: String, reason: String },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Render error: {0}")]
    RenderError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Store failure on a read path (dashboard, payment history, profile).
    pub fn read_failed(context: &str, error: DbErr) -> Self {
        tracing::error!(context, error = %error, "store read failed");
        ServiceError::ReadFailed(context.to_string())
    }

    pub fn verification_failed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::VerificationFailed {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence_failed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::PersistenceFailed {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) | Self::InvalidInput(_) | Self::UnknownService(_) => {
                ErrorKind::Input
            }
            Self::Unauthorized(_) => ErrorKind::Authentication,
            Self::PaymentCancelled(_) => ErrorKind::Payment,
            Self::VerificationFailed { .. } => ErrorKind::Verification,
            Self::PersistenceFailed { .. } => ErrorKind::Persistence,
            Self::ReadFailed(_) => ErrorKind::Read,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DatabaseError(_)
            | Self::ExternalServiceError(_)
            | Self::RenderError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Payment reference carried by the error, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::PaymentCancelled(reference) => Some(reference),
            Self::VerificationFailed { reference, .. }
            | Self::PersistenceFailed { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidInput(_) | Self::UnknownService(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PaymentCancelled(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::VerificationFailed { .. } | Self::ExternalServiceError(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::ReadFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PersistenceFailed { .. }
            | Self::RenderError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::VerificationFailed { .. } => {
                "Error processing payment. Please contact support.".to_string()
            }
            Self::PersistenceFailed { .. } => {
                "Payment received but request could not be recorded. Please contact support."
                    .to_string()
            }
            Self::PaymentCancelled(_) => {
                "Payment was cancelled. You can submit the request again.".to_string()
            }
            Self::ReadFailed(_) => "Failed to load data. Please try again.".to_string(),
            Self::ExternalServiceError(_) => "Payment provider unavailable".to_string(),
            Self::RenderError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind(),
            message: self.response_message(),
            reference: self.reference().map(str::to_string),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

pub type AppError = ServiceError;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};
    use test_case::test_case;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn verification_failure_keeps_reference_in_body() {
        let response =
            ServiceError::verification_failed("EGOV-1-abc", "status=failed").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.kind, ErrorKind::Verification);
        assert_eq!(payload.reference.as_deref(), Some("EGOV-1-abc"));
        assert_eq!(
            payload.message,
            "Error processing payment. Please contact support."
        );
    }

    #[test_case(ServiceError::InvalidInput("x".into()), ErrorKind::Input, StatusCode::BAD_REQUEST)]
    #[test_case(ServiceError::UnknownService("x".into()), ErrorKind::Input, StatusCode::BAD_REQUEST)]
    #[test_case(ServiceError::Unauthorized("x".into()), ErrorKind::Authentication, StatusCode::UNAUTHORIZED)]
    #[test_case(ServiceError::PaymentCancelled("r".into()), ErrorKind::Payment, StatusCode::CONFLICT)]
    #[test_case(ServiceError::verification_failed("r", "x"), ErrorKind::Verification, StatusCode::BAD_GATEWAY)]
    #[test_case(ServiceError::persistence_failed("r", "x"), ErrorKind::Persistence, StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(ServiceError::ReadFailed("x".into()), ErrorKind::Read, StatusCode::SERVICE_UNAVAILABLE)]
    #[test_case(ServiceError::Conflict("x".into()), ErrorKind::Conflict, StatusCode::CONFLICT)]
    #[test_case(ServiceError::NotFound("x".into()), ErrorKind::NotFound, StatusCode::NOT_FOUND)]
    #[test_case(ServiceError::ValidationError("x".into()), ErrorKind::Input, StatusCode::BAD_REQUEST)]
    #[test_case(ServiceError::DatabaseError(DbErr::Custom("x".into())), ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(ServiceError::ExternalServiceError("x".into()), ErrorKind::Internal, StatusCode::BAD_GATEWAY)]
    #[test_case(ServiceError::RenderError("x".into()), ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(ServiceError::SerializationError("x".into()), ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(ServiceError::InternalError("x".into()), ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR)]
    fn kind_and_status_mapping(err: ServiceError, kind: ErrorKind, status: StatusCode) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.status_code(), status);
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::persistence_failed("EGOV-1-abc", "disk full").response_message(),
            "Payment received but request could not be recorded. Please contact support."
        );
        assert_eq!(
            ServiceError::NotFound("Request 7".into()).response_message(),
            "Not found: Request 7"
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        assert_eq!(ErrorKind::NotFound.as_ref(), "not_found");
        assert_eq!(
            serde_json::to_value(ErrorKind::Verification).unwrap(),
            json!("verification")
        );
    }
}
