use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// `reason` is a stable machine-readable code such as `slot_unavailable`;
    /// `context` carries what the client needs to refresh and retry.
    #[error("Conflict: {message}")]
    Conflict {
        reason: String,
        message: String,
        context: Option<Value>,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AppError {
    pub fn conflict(reason: impl Into<String>, message: impl Into<String>, context: Option<Value>) -> Self {
        AppError::Conflict {
            reason: reason.into(),
            message: message.into(),
            context,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_)
            | AppError::ValidationError(_)
            | AppError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            AppError::Auth(_) => "unauthenticated",
            AppError::Forbidden(_) => "not_authorized",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) | AppError::ValidationError(_) => "validation_error",
            AppError::InvalidTransition(_) => "invalid-transition",
            AppError::Conflict { reason, .. } => reason.as_str(),
            AppError::ServiceUnavailable(_) => "store_unavailable",
            AppError::Internal(_) | AppError::Database(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ValidationError(msg)
            | AppError::InvalidTransition(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::Internal(msg)
            | AppError::Database(msg) => msg.as_str(),
            AppError::Conflict { message, .. } => message.as_str(),
        }
    }

    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "error": self.message(),
            "kind": self.kind(),
        });

        if let AppError::Conflict { reason, context, .. } = self {
            body["reason"] = json!(reason);
            if let Some(context) = context {
                body["context"] = context.clone();
            }
        }

        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, self.message());
        } else {
            tracing::warn!("Request rejected: {}: {}", status, self.message());
        }

        (status, Json(self.to_body())).into_response()
    }
}
